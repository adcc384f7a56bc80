//! Parent-before-child commit enumeration.

use crate::repository::Result;
use git2::{Oid, Repository, Sort};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};

/// Commits reachable from a tip but not from any hidden commit, yielded so
/// that every commit comes after all of its parents.
///
/// The order is computed up front from commit headers; commits themselves
/// are looked up lazily as the walker is consumed. Ties are broken by commit
/// time and then by id, so the order is deterministic.
pub struct CommitWalker<'r> {
    repo: &'r Repository,
    order: std::vec::IntoIter<Oid>,
    total: usize,
    pending_children: HashMap<Oid, usize>,
    boundary: BTreeSet<Oid>,
    emitted: HashSet<Oid>,
}

impl<'r> CommitWalker<'r> {
    /// Walk from `tip`, excluding `hidden` and everything reachable from it.
    pub fn new(repo: &'r Repository, tip: Oid, hidden: &[Oid]) -> Result<Self> {
        let mut revwalk = repo.revwalk()?;
        revwalk.set_sorting(Sort::NONE)?;
        revwalk.push(tip)?;
        for oid in hidden {
            revwalk.hide(*oid)?;
        }

        let mut pending = HashSet::new();
        for oid in revwalk {
            pending.insert(oid?);
        }

        let mut parents: HashMap<Oid, Vec<Oid>> = HashMap::with_capacity(pending.len());
        let mut times: HashMap<Oid, i64> = HashMap::with_capacity(pending.len());
        let mut pending_children: HashMap<Oid, usize> = HashMap::new();
        let mut boundary = BTreeSet::new();
        for oid in &pending {
            let commit = repo.find_commit(*oid)?;
            times.insert(*oid, commit.time().seconds());
            let mut ids: Vec<Oid> = commit.parent_ids().collect();
            ids.dedup();
            for parent in &ids {
                *pending_children.entry(*parent).or_default() += 1;
                if !pending.contains(parent) {
                    boundary.insert(*parent);
                }
            }
            parents.insert(*oid, ids);
        }

        let order = topological_order(&pending, &parents, &times);
        let total = order.len();
        Ok(Self {
            repo,
            order: order.into_iter(),
            total,
            pending_children,
            boundary,
            emitted: HashSet::new(),
        })
    }

    /// Number of commits the walk yields.
    pub fn total(&self) -> usize {
        self.total
    }

    /// `(commit, walked children)` for every parent of a walked commit.
    pub fn child_counts(&self) -> impl Iterator<Item = (Oid, usize)> + '_ {
        self.pending_children.iter().map(|(oid, count)| (*oid, *count))
    }

    /// Parents of walked commits that are not walked themselves.
    pub fn boundary(&self) -> impl Iterator<Item = Oid> + '_ {
        self.boundary.iter().copied()
    }
}

impl<'r> Iterator for CommitWalker<'r> {
    type Item = Result<git2::Commit<'r>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let oid = self.order.next()?;
            if self.emitted.insert(oid) {
                return Some(self.repo.find_commit(oid).map_err(Into::into));
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.order.len()))
    }
}

/// Kahn's algorithm over the pending commits, oldest ready commit first.
fn topological_order(
    pending: &HashSet<Oid>,
    parents: &HashMap<Oid, Vec<Oid>>,
    times: &HashMap<Oid, i64>,
) -> Vec<Oid> {
    let mut waiting: HashMap<Oid, usize> = HashMap::with_capacity(pending.len());
    let mut children: HashMap<Oid, Vec<Oid>> = HashMap::new();
    for oid in pending {
        let ids = parents.get(oid).map(Vec::as_slice).unwrap_or(&[]);
        let mut count = 0;
        for parent in ids.iter().filter(|p| pending.contains(p)) {
            children.entry(*parent).or_default().push(*oid);
            count += 1;
        }
        waiting.insert(*oid, count);
    }

    let time = |oid: &Oid| times.get(oid).copied().unwrap_or(0);
    let mut ready: BinaryHeap<Reverse<(i64, Oid)>> = waiting
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(oid, _)| Reverse((time(oid), *oid)))
        .collect();

    let mut order = Vec::with_capacity(pending.len());
    while let Some(Reverse((_, oid))) = ready.pop() {
        order.push(oid);
        for child in children.get(&oid).map(Vec::as_slice).unwrap_or(&[]) {
            if let Some(count) = waiting.get_mut(child) {
                *count -= 1;
                if *count == 0 {
                    ready.push(Reverse((time(child), *child)));
                }
            }
        }
    }
    order
}
