//! Incremental line attribution.
//!
//! [`apply_commit`] is a pure function from the blame state of a commit's
//! parents plus the commit's diff to the commit's own blame state and the
//! hunk delta that has to be written to the graph. Work is proportional to the
//! number of attribution ranges in the touched files, never to the size of the
//! whole tree.

use crate::error::Error;
use crate::model::{BlameHunk, Commit};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// A line range `[start, end)` attributed to one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
    pub commit: Arc<str>,
}

/// Attribution of every line of one file. Ranges partition `[0, line_count)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBlame {
    ranges: Vec<LineRange>,
}

impl FileBlame {
    pub fn ranges(&self) -> &[LineRange] {
        &self.ranges
    }

    pub fn line_count(&self) -> usize {
        self.ranges.last().map(|r| r.end).unwrap_or(0)
    }

    /// Ranges are contiguous from line 0, non-empty and non-overlapping.
    pub fn is_partition(&self) -> bool {
        let mut next = 0;
        for range in &self.ranges {
            if range.start != next || range.end <= range.start {
                return false;
            }
            next = range.end;
        }
        true
    }

    /// The ranges as graph hunks of `path`.
    pub fn hunks(&self, path: &str) -> Vec<BlameHunk> {
        self.ranges
            .iter()
            .map(|r| BlameHunk::new(path, r.start, r.end, r.commit.as_ref()))
            .collect()
    }
}

/// A commit that still owns lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Owner {
    signature: Arc<str>,
    lines: u64,
}

/// Per-file attribution of one commit's tree.
///
/// Line totals per owning commit and per author signature are kept current
/// as files are replaced, so reading them never scans the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlameState {
    files: BTreeMap<String, Arc<FileBlame>>,
    #[serde(default)]
    owners: BTreeMap<Arc<str>, Owner>,
    #[serde(default)]
    authors: BTreeMap<String, u64>,
}

impl BlameState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&FileBlame> {
        self.files.get(path).map(|f| f.as_ref())
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(|p| p.as_str())
    }

    /// Lines currently attributed to each author signature.
    pub fn lines_per_author(&self) -> &BTreeMap<String, u64> {
        &self.authors
    }

    fn signature_of(&self, commit: &str) -> Option<Arc<str>> {
        self.owners.get(commit).map(|owner| owner.signature.clone())
    }

    /// Replace (or with `None` remove) the attribution of `path`.
    ///
    /// New owners are looked up through `signature_of`. The incoming ranges
    /// are credited before the previous ones are released, so owners carried
    /// over keep their signature.
    fn set_file(
        &mut self,
        path: &str,
        blame: Option<Arc<FileBlame>>,
        signature_of: &dyn Fn(&str) -> Option<Arc<str>>,
    ) -> Option<Arc<FileBlame>> {
        if let Some(blame) = &blame {
            for range in blame.ranges() {
                let lines = (range.end - range.start) as u64;
                let owner = self.owners.entry(range.commit.clone()).or_insert_with(|| Owner {
                    signature: signature_of(&range.commit).unwrap_or_else(|| Arc::from("")),
                    lines: 0,
                });
                owner.lines += lines;
                *self.authors.entry(owner.signature.to_string()).or_default() += lines;
            }
        }
        let previous = match blame {
            Some(blame) => self.files.insert(path.to_string(), blame),
            None => self.files.remove(path),
        };
        if let Some(previous) = &previous {
            self.release(previous);
        }
        previous
    }

    fn release(&mut self, blame: &FileBlame) {
        for range in blame.ranges() {
            let lines = (range.end - range.start) as u64;
            let Some(owner) = self.owners.get_mut(range.commit.as_ref()) else {
                continue;
            };
            owner.lines = owner.lines.saturating_sub(lines);
            let signature = owner.signature.clone();
            if owner.lines == 0 {
                self.owners.remove(range.commit.as_ref());
            }
            if let Some(total) = self.authors.get_mut(signature.as_ref()) {
                *total = total.saturating_sub(lines);
                if *total == 0 {
                    self.authors.remove(signature.as_ref());
                }
            }
        }
    }
}

/// How a file changed relative to one parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Added,
    Deleted,
    Modified,
    Renamed,
    Copied,
}

/// A changed region, 0-based: old lines `[old_start, old_start + old_len)`
/// became new lines `[new_start, new_start + new_len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineHunk {
    pub old_start: usize,
    pub old_len: usize,
    pub new_start: usize,
    pub new_len: usize,
}

/// One file entry of a tree-to-tree diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub status: FileStatus,
    pub hunks: Vec<LineHunk>,
    /// Set when the file is binary or could not be diffed
    pub skip_reason: Option<String>,
    /// Lines of the new content, when known
    #[serde(default)]
    pub new_line_count: Option<usize>,
}

impl FileDiff {
    /// Path the file has after the change, falling back to the old path for deletions.
    pub fn path(&self) -> &str {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or("")
    }
}

/// Diff of a commit against one of its parents (`parent` is `None` for root commits).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentDiff {
    pub parent: Option<String>,
    pub files: Vec<FileDiff>,
}

/// Diffs of a commit against each of its parents, first parent first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitDiff {
    pub parents: Vec<ParentDiff>,
}

/// Hunk changes of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDelta {
    pub path: String,
    /// Line count after the commit
    pub line_count: usize,
    /// Hunks no longer current
    pub removed: Vec<BlameHunk>,
    /// Hunks that became current
    pub added: Vec<BlameHunk>,
    /// The file is gone from the tree
    pub deleted: bool,
}

/// Hunk changes of one commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HunkDelta {
    pub files: Vec<FileDelta>,
}

impl HunkDelta {
    pub fn added(&self) -> impl Iterator<Item = &BlameHunk> {
        self.files.iter().flat_map(|f| f.added.iter())
    }

    pub fn removed(&self) -> impl Iterator<Item = &BlameHunk> {
        self.files.iter().flat_map(|f| f.removed.iter())
    }

    /// Changes that turn the graph of `from` into the graph of `to`.
    ///
    /// Used when the graph last received a commit other than the first
    /// parent. Files whose attribution is shared or equal are left out.
    pub fn between(from: &BlameState, to: &BlameState) -> Self {
        let paths: BTreeSet<&str> = from.paths().chain(to.paths()).collect();
        let mut files = Vec::new();
        for path in paths {
            let old = from.files.get(path);
            let new = to.files.get(path);
            if let (Some(old), Some(new)) = (old, new) {
                if Arc::ptr_eq(old, new) || old == new {
                    continue;
                }
            }
            files.push(file_delta(
                path,
                new.map(|blame| blame.line_count()),
                old.map(|blame| blame.hunks(path)).unwrap_or_default(),
                new.map(|blame| blame.hunks(path)).unwrap_or_default(),
            ));
        }
        Self { files }
    }
}

/// Hunk changes of `path` from `prior` to `current`; `line_count` is `None`
/// once the file is gone.
fn file_delta(
    path: &str,
    line_count: Option<usize>,
    mut prior: Vec<BlameHunk>,
    current: Vec<BlameHunk>,
) -> FileDelta {
    let prior_set: HashSet<&BlameHunk> = prior.iter().collect();
    let added: Vec<BlameHunk> = current
        .iter()
        .filter(|h| !prior_set.contains(h))
        .cloned()
        .collect();
    let current_set: HashSet<&BlameHunk> = current.iter().collect();
    prior.retain(|h| !current_set.contains(h));
    FileDelta {
        path: path.to_string(),
        line_count: line_count.unwrap_or(0),
        removed: prior,
        added,
        deleted: line_count.is_none(),
    }
}

/// Result of applying one commit.
#[derive(Debug)]
pub struct BlameOutcome {
    pub state: BlameState,
    pub delta: HunkDelta,
    /// Files skipped with a [`Error::Diff`]
    pub skipped: Vec<Error>,
}

/// Compute the blame state of `commit`.
///
/// `base` is the state of the first parent (empty for root commits) and is
/// consumed; `other_parents` are the states of the remaining parents in
/// order. The files touched are those of the first-parent diff. A line keeps
/// the attribution of the first parent in which it is unchanged; lines new
/// relative to every parent are attributed to `commit`. A file the parent has
/// no attribution for (it was skipped there) is attributed in full.
pub fn apply_commit(
    mut base: BlameState,
    other_parents: &[&BlameState],
    commit: &Commit,
    diff: &CommitDiff,
) -> BlameOutcome {
    let sha: Arc<str> = Arc::from(commit.sha.as_str());
    let own_signature: Arc<str> = Arc::from(commit.signature.as_str());
    let signature_of = |owner: &str| -> Option<Arc<str>> {
        if owner == commit.sha {
            return Some(own_signature.clone());
        }
        other_parents.iter().find_map(|state| state.signature_of(owner))
    };
    let mut delta = HunkDelta::default();
    let mut skipped = Vec::new();

    let Some(primary) = diff.parents.first() else {
        return BlameOutcome { state: base, delta, skipped };
    };

    let fallbacks: Vec<(&BlameState, HashMap<&str, &FileDiff>)> = other_parents
        .iter()
        .zip(diff.parents.iter().skip(1))
        .map(|(state, parent_diff)| (*state, index_by_new_path(parent_diff)))
        .collect();

    for file in &primary.files {
        if let Some(reason) = &file.skip_reason {
            skipped.push(Error::Diff {
                path: file.path().to_string(),
                reason: reason.clone(),
            });
            if let Some(file_delta) = drop_paths(&mut base, file) {
                delta.files.push(file_delta);
            }
            continue;
        }

        if file.status == FileStatus::Deleted {
            if let Some(file_delta) = drop_paths(&mut base, file) {
                delta.files.push(file_delta);
            }
            continue;
        }

        let Some(new_path) = file.new_path.as_deref() else {
            continue;
        };
        let old_path = match file.status {
            FileStatus::Added => None,
            _ => file.old_path.as_deref(),
        };

        let empty = FileBlame::default();
        let attributed = old_path.and_then(|p| base.get(p));
        let projected = match (attributed, file.new_line_count) {
            (None, Some(lines)) if file.status != FileStatus::Added => Ok(vec![Span {
                start: 0,
                end: lines,
                commit: None,
            }]),
            (old, _) => project(old.unwrap_or(&empty), &file.hunks),
        };
        let projected = projected.and_then(|spans| {
            let len = spans.last().map(|s| s.end).unwrap_or(0);
            match file.new_line_count {
                Some(lines) if lines != len => Err(format!(
                    "diff covers {} lines but the new content has {}",
                    len, lines
                )),
                _ => Ok(spans),
            }
        });
        let mut spans = match projected {
            Ok(spans) => spans,
            Err(reason) => {
                skipped.push(Error::Diff {
                    path: new_path.to_string(),
                    reason,
                });
                if let Some(file_delta) = drop_paths(&mut base, file) {
                    delta.files.push(file_delta);
                }
                continue;
            }
        };

        let new_len = spans.last().map(|s| s.end).unwrap_or(0);
        for (state, index) in &fallbacks {
            if spans.iter().all(|s| s.commit.is_some()) {
                break;
            }
            if let Some(other) = parent_projection(state, index, new_path, new_len) {
                spans = fill_from(spans, &other);
            }
        }

        let blame = Arc::new(finalize(spans, &sha));
        debug_assert!(blame.is_partition());
        let line_count = blame.line_count();
        let current = blame.hunks(new_path);
        let prior = base.get(new_path).map(|b| b.hunks(new_path)).unwrap_or_default();
        base.set_file(new_path, Some(blame), &signature_of);

        if file.status == FileStatus::Renamed {
            if let Some(old_path) = old_path.filter(|p| *p != new_path) {
                if let Some(previous) = base.set_file(old_path, None, &signature_of) {
                    delta
                        .files
                        .push(file_delta(old_path, None, previous.hunks(old_path), Vec::new()));
                }
            }
        }
        delta
            .files
            .push(file_delta(new_path, Some(line_count), prior, current));
    }

    BlameOutcome { state: base, delta, skipped }
}

/// A projected range; `None` marks lines new relative to the projected parent.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
    commit: Option<Arc<str>>,
}

/// Map a parent's attribution through the hunks of a diff.
fn project(old: &FileBlame, hunks: &[LineHunk]) -> Result<Vec<Span>, String> {
    let old_len = old.line_count();
    let mut hunks = hunks.to_vec();
    hunks.sort_by_key(|h| (h.old_start, h.new_start));

    let mut out = Vec::new();
    let mut idx = 0;
    let (mut old_pos, mut new_pos) = (0, 0);
    for hunk in &hunks {
        if hunk.old_start < old_pos || hunk.old_start + hunk.old_len > old_len {
            return Err(format!(
                "hunk at old line {} exceeds the {} attributed lines",
                hunk.old_start, old_len
            ));
        }
        let gap = hunk.old_start - old_pos;
        if new_pos + gap != hunk.new_start {
            return Err(format!(
                "hunk at new line {} does not line up with line {}",
                hunk.new_start,
                new_pos + gap
            ));
        }
        copy_ranges(old.ranges(), &mut idx, old_pos, hunk.old_start, new_pos, &mut out);
        new_pos += gap;
        if hunk.new_len > 0 {
            out.push(Span {
                start: new_pos,
                end: new_pos + hunk.new_len,
                commit: None,
            });
            new_pos += hunk.new_len;
        }
        old_pos = hunk.old_start + hunk.old_len;
    }
    copy_ranges(old.ranges(), &mut idx, old_pos, old_len, new_pos, &mut out);
    Ok(out)
}

/// Copy the attribution of old lines `[from, to)` so that `from` lands on `new_start`.
fn copy_ranges(
    ranges: &[LineRange],
    idx: &mut usize,
    from: usize,
    to: usize,
    new_start: usize,
    out: &mut Vec<Span>,
) {
    if from >= to {
        return;
    }
    while *idx < ranges.len() && ranges[*idx].end <= from {
        *idx += 1;
    }
    while *idx < ranges.len() && ranges[*idx].start < to {
        let range = &ranges[*idx];
        let start = range.start.max(from);
        let end = range.end.min(to);
        out.push(Span {
            start: new_start + (start - from),
            end: new_start + (end - from),
            commit: Some(range.commit.clone()),
        });
        if range.end <= to {
            *idx += 1;
        } else {
            break;
        }
    }
}

/// Fill the `None` spans of `primary` from `fallback`. Both cover the same lines.
fn fill_from(primary: Vec<Span>, fallback: &[Span]) -> Vec<Span> {
    let mut out = Vec::with_capacity(primary.len());
    let mut fi = 0;
    for span in primary {
        if span.commit.is_some() {
            out.push(span);
            continue;
        }
        while fi < fallback.len() && fallback[fi].end <= span.start {
            fi += 1;
        }
        let mut j = fi;
        while j < fallback.len() && fallback[j].start < span.end {
            out.push(Span {
                start: fallback[j].start.max(span.start),
                end: fallback[j].end.min(span.end),
                commit: fallback[j].commit.clone(),
            });
            j += 1;
        }
        fi = j.saturating_sub(1).max(fi);
    }
    out
}

/// Attribution of `path` in a non-first parent, projected onto the merge result.
fn parent_projection(
    state: &BlameState,
    index: &HashMap<&str, &FileDiff>,
    path: &str,
    expected_len: usize,
) -> Option<Vec<Span>> {
    let spans = match index.get(path) {
        Some(file) if file.skip_reason.is_some() => return None,
        Some(file) => {
            let empty = FileBlame::default();
            let old = match file.status {
                FileStatus::Added => &empty,
                _ => file
                    .old_path
                    .as_deref()
                    .and_then(|p| state.get(p))
                    .unwrap_or(&empty),
            };
            project(old, &file.hunks).ok()?
        }
        None => state
            .get(path)?
            .ranges()
            .iter()
            .map(|r| Span {
                start: r.start,
                end: r.end,
                commit: Some(r.commit.clone()),
            })
            .collect(),
    };
    let len = spans.last().map(|s| s.end).unwrap_or(0);
    (len == expected_len).then_some(spans)
}

/// Resolve remaining `None` spans to `commit` and coalesce equal neighbours.
fn finalize(spans: Vec<Span>, commit: &Arc<str>) -> FileBlame {
    let mut ranges: Vec<LineRange> = Vec::with_capacity(spans.len());
    for span in spans {
        if span.end <= span.start {
            continue;
        }
        let owner = span.commit.unwrap_or_else(|| commit.clone());
        match ranges.last_mut() {
            Some(last) if last.end == span.start && last.commit == owner => last.end = span.end,
            _ => ranges.push(LineRange {
                start: span.start,
                end: span.end,
                commit: owner,
            }),
        }
    }
    FileBlame { ranges }
}

/// Remove the file's old and new paths from the state, returning their hunk removals.
fn drop_paths(state: &mut BlameState, file: &FileDiff) -> Option<FileDelta> {
    let mut removed = Vec::new();
    let mut path = None;
    for p in [file.old_path.as_deref(), file.new_path.as_deref()]
        .into_iter()
        .flatten()
    {
        if let Some(previous) = state.set_file(p, None, &|_| None) {
            removed.extend(previous.hunks(p));
            path.get_or_insert_with(|| p.to_string());
        }
    }
    path.map(|path| FileDelta {
        path,
        line_count: 0,
        removed,
        added: Vec::new(),
        deleted: true,
    })
}

fn index_by_new_path(diff: &ParentDiff) -> HashMap<&str, &FileDiff> {
    diff.files
        .iter()
        .filter_map(|f| f.new_path.as_deref().map(|p| (p, f)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn commit(sha: &str, parents: &[&str]) -> Commit {
        commit_by(sha, parents, "Ada <ada@example.com>")
    }

    fn commit_by(sha: &str, parents: &[&str], signature: &str) -> Commit {
        Commit {
            sha: sha.to_string(),
            message: format!("commit {}", sha),
            signature: signature.to_string(),
            date: Utc::now(),
            parents: parents.iter().map(|p| p.to_string()).collect(),
            lines_per_author: BTreeMap::new(),
        }
    }

    fn added(path: &str, lines: usize) -> FileDiff {
        FileDiff {
            old_path: None,
            new_path: Some(path.to_string()),
            status: FileStatus::Added,
            hunks: if lines == 0 {
                vec![]
            } else {
                vec![LineHunk { old_start: 0, old_len: 0, new_start: 0, new_len: lines }]
            },
            skip_reason: None,
            new_line_count: Some(lines),
        }
    }

    fn modified(path: &str, hunks: &[(usize, usize, usize, usize)]) -> FileDiff {
        FileDiff {
            old_path: Some(path.to_string()),
            new_path: Some(path.to_string()),
            status: FileStatus::Modified,
            hunks: hunks
                .iter()
                .map(|&(old_start, old_len, new_start, new_len)| LineHunk {
                    old_start,
                    old_len,
                    new_start,
                    new_len,
                })
                .collect(),
            skip_reason: None,
            new_line_count: None,
        }
    }

    fn single_parent(parent: Option<&str>, files: Vec<FileDiff>) -> CommitDiff {
        CommitDiff {
            parents: vec![ParentDiff {
                parent: parent.map(str::to_string),
                files,
            }],
        }
    }

    fn owners(blame: &FileBlame) -> Vec<(usize, usize, String)> {
        blame
            .ranges()
            .iter()
            .map(|r| (r.start, r.end, r.commit.to_string()))
            .collect()
    }

    /// Three commits, each appending two lines to A.txt.
    fn linear_history() -> BlameState {
        let c1 = apply_commit(
            BlameState::new(),
            &[],
            &commit("c1", &[]),
            &single_parent(None, vec![added("A.txt", 2)]),
        );
        let c2 = apply_commit(
            c1.state,
            &[],
            &commit("c2", &["c1"]),
            &single_parent(Some("c1"), vec![modified("A.txt", &[(2, 0, 2, 2)])]),
        );
        apply_commit(
            c2.state,
            &[],
            &commit("c3", &["c2"]),
            &single_parent(Some("c2"), vec![modified("A.txt", &[(4, 0, 4, 2)])]),
        )
        .state
    }

    #[test]
    fn test_root_commit_owns_every_line() {
        let outcome = apply_commit(
            BlameState::new(),
            &[],
            &commit("root", &[]),
            &single_parent(None, vec![added("a.rs", 5), added("b.rs", 3), added("empty", 0)]),
        );
        assert_eq!(owners(outcome.state.get("a.rs").unwrap()), vec![(0, 5, "root".into())]);
        assert_eq!(owners(outcome.state.get("b.rs").unwrap()), vec![(0, 3, "root".into())]);
        assert_eq!(outcome.state.get("empty").unwrap().line_count(), 0);
        assert_eq!(outcome.delta.added().count(), 2);
        assert!(outcome.skipped.is_empty());
    }

    #[test]
    fn test_linear_appends() {
        let state = linear_history();
        let blame = state.get("A.txt").unwrap();
        assert!(blame.is_partition());
        assert_eq!(
            owners(blame),
            vec![(0, 2, "c1".into()), (2, 4, "c2".into()), (4, 6, "c3".into())]
        );
    }

    #[test]
    fn test_modification_splits_hunk() {
        let outcome = apply_commit(
            linear_history(),
            &[],
            &commit("c4", &["c3"]),
            &single_parent(Some("c3"), vec![modified("A.txt", &[(2, 1, 2, 1)])]),
        );
        let blame = outcome.state.get("A.txt").unwrap();
        assert!(blame.is_partition());
        assert_eq!(
            owners(blame),
            vec![
                (0, 2, "c1".into()),
                (2, 3, "c4".into()),
                (3, 4, "c2".into()),
                (4, 6, "c3".into()),
            ]
        );

        let file = &outcome.delta.files[0];
        assert_eq!(file.removed, vec![BlameHunk::new("A.txt", 2, 4, "c2")]);
        assert_eq!(
            file.added,
            vec![
                BlameHunk::new("A.txt", 2, 3, "c4"),
                BlameHunk::new("A.txt", 3, 4, "c2"),
            ]
        );
    }

    #[test]
    fn test_insertion_shifts_following_ranges() {
        let outcome = apply_commit(
            linear_history(),
            &[],
            &commit("c4", &["c3"]),
            &single_parent(Some("c3"), vec![modified("A.txt", &[(0, 0, 0, 1)])]),
        );
        assert_eq!(
            owners(outcome.state.get("A.txt").unwrap()),
            vec![
                (0, 1, "c4".into()),
                (1, 3, "c1".into()),
                (3, 5, "c2".into()),
                (5, 7, "c3".into()),
            ]
        );
        assert_eq!(outcome.delta.files[0].removed.len(), 3);
        assert_eq!(outcome.delta.files[0].added.len(), 4);
    }

    #[test]
    fn test_deletion_coalesces_neighbours() {
        let c1 = apply_commit(
            BlameState::new(),
            &[],
            &commit("c1", &[]),
            &single_parent(None, vec![added("A.txt", 4)]),
        );
        let c2 = apply_commit(
            c1.state,
            &[],
            &commit("c2", &["c1"]),
            &single_parent(Some("c1"), vec![modified("A.txt", &[(2, 0, 2, 1)])]),
        );
        let c3 = apply_commit(
            c2.state,
            &[],
            &commit("c3", &["c2"]),
            &single_parent(Some("c2"), vec![modified("A.txt", &[(2, 1, 2, 0)])]),
        );
        assert_eq!(owners(c3.state.get("A.txt").unwrap()), vec![(0, 4, "c1".into())]);
    }

    #[test]
    fn test_deleted_file_loses_hunks() {
        let diff = single_parent(
            Some("c3"),
            vec![FileDiff {
                old_path: Some("A.txt".into()),
                new_path: None,
                status: FileStatus::Deleted,
                hunks: vec![LineHunk { old_start: 0, old_len: 6, new_start: 0, new_len: 0 }],
                skip_reason: None,
                new_line_count: None,
            }],
        );
        let outcome = apply_commit(linear_history(), &[], &commit("c4", &["c3"]), &diff);
        assert!(outcome.state.get("A.txt").is_none());
        let file = &outcome.delta.files[0];
        assert!(file.deleted);
        assert_eq!(file.removed.len(), 3);
        assert!(file.added.is_empty());
    }

    #[test]
    fn test_rename_carries_attribution() {
        let diff = single_parent(
            Some("c3"),
            vec![FileDiff {
                old_path: Some("A.txt".into()),
                new_path: Some("B.txt".into()),
                status: FileStatus::Renamed,
                hunks: vec![LineHunk { old_start: 6, old_len: 0, new_start: 6, new_len: 1 }],
                skip_reason: None,
                new_line_count: None,
            }],
        );
        let outcome = apply_commit(linear_history(), &[], &commit("c4", &["c3"]), &diff);
        assert!(outcome.state.get("A.txt").is_none());
        assert_eq!(
            owners(outcome.state.get("B.txt").unwrap()),
            vec![
                (0, 2, "c1".into()),
                (2, 4, "c2".into()),
                (4, 6, "c3".into()),
                (6, 7, "c4".into()),
            ]
        );
        let old = outcome.delta.files.iter().find(|f| f.path == "A.txt").unwrap();
        assert!(old.deleted);
        assert_eq!(old.removed.len(), 3);
        let new = outcome.delta.files.iter().find(|f| f.path == "B.txt").unwrap();
        assert_eq!(new.added.len(), 4);
    }

    #[test]
    fn test_binary_file_skipped_rest_proceeds() {
        let mut binary = added("logo.png", 0);
        binary.skip_reason = Some("binary file".into());
        let outcome = apply_commit(
            BlameState::new(),
            &[],
            &commit("c1", &[]),
            &single_parent(None, vec![binary, added("README.md", 3)]),
        );
        assert!(outcome.state.get("logo.png").is_none());
        assert_eq!(outcome.state.get("README.md").unwrap().line_count(), 3);
        assert_eq!(outcome.skipped.len(), 1);
        assert!(matches!(&outcome.skipped[0], Error::Diff { path, .. } if path == "logo.png"));
    }

    #[test]
    fn test_hunk_outside_known_lines_is_diff_error() {
        let outcome = apply_commit(
            linear_history(),
            &[],
            &commit("c4", &["c3"]),
            &single_parent(
                Some("c3"),
                vec![modified("A.txt", &[(10, 2, 10, 1)]), added("B.txt", 1)],
            ),
        );
        assert_eq!(outcome.skipped.len(), 1);
        assert!(outcome.state.get("A.txt").is_none());
        assert!(outcome.state.get("B.txt").is_some());
        let dropped = outcome.delta.files.iter().find(|f| f.path == "A.txt").unwrap();
        assert_eq!(dropped.removed.len(), 3);
    }

    #[test]
    fn test_merge_of_disjoint_files_is_union() {
        let root = apply_commit(
            BlameState::new(),
            &[],
            &commit("root", &[]),
            &single_parent(None, vec![added("A.txt", 2)]),
        )
        .state;
        let left = apply_commit(
            root.clone(),
            &[],
            &commit("left", &["root"]),
            &single_parent(Some("root"), vec![added("B.txt", 3)]),
        )
        .state;
        let right = apply_commit(
            root,
            &[],
            &commit("right", &["root"]),
            &single_parent(Some("root"), vec![added("C.txt", 4)]),
        )
        .state;

        let merge_diff = CommitDiff {
            parents: vec![
                ParentDiff { parent: Some("left".into()), files: vec![added("C.txt", 4)] },
                ParentDiff { parent: Some("right".into()), files: vec![added("B.txt", 3)] },
            ],
        };
        let outcome = apply_commit(
            left.clone(),
            &[&right],
            &commit("merge", &["left", "right"]),
            &merge_diff,
        );

        assert_eq!(owners(outcome.state.get("A.txt").unwrap()), vec![(0, 2, "root".into())]);
        assert_eq!(owners(outcome.state.get("B.txt").unwrap()), vec![(0, 3, "left".into())]);
        assert_eq!(owners(outcome.state.get("C.txt").unwrap()), vec![(0, 4, "right".into())]);

        let hunks: Vec<BlameHunk> = outcome
            .state
            .paths()
            .flat_map(|path| outcome.state.get(path).map(|b| b.hunks(path)).unwrap_or_default())
            .collect();
        let unique: HashSet<_> = hunks.iter().collect();
        assert_eq!(unique.len(), hunks.len());
        assert!(outcome.delta.added().all(|h| h.commit_sha != "merge"));
    }

    #[test]
    fn test_merge_resolution_lines_belong_to_merge() {
        let root = apply_commit(
            BlameState::new(),
            &[],
            &commit("root", &[]),
            &single_parent(None, vec![added("A.txt", 3)]),
        )
        .state;
        // left rewrites line 0, right rewrites line 2
        let left = apply_commit(
            root.clone(),
            &[],
            &commit("left", &["root"]),
            &single_parent(Some("root"), vec![modified("A.txt", &[(0, 1, 0, 1)])]),
        )
        .state;
        let right = apply_commit(
            root,
            &[],
            &commit("right", &["root"]),
            &single_parent(Some("root"), vec![modified("A.txt", &[(2, 1, 2, 1)])]),
        )
        .state;
        // merge takes right's line 2 and adds a new line 3
        let merge_diff = CommitDiff {
            parents: vec![
                ParentDiff {
                    parent: Some("left".into()),
                    files: vec![modified("A.txt", &[(2, 1, 2, 2)])],
                },
                ParentDiff {
                    parent: Some("right".into()),
                    files: vec![modified("A.txt", &[(0, 1, 0, 1), (3, 0, 3, 1)])],
                },
            ],
        };
        let outcome = apply_commit(
            left,
            &[&right],
            &commit("merge", &["left", "right"]),
            &merge_diff,
        );
        assert_eq!(
            owners(outcome.state.get("A.txt").unwrap()),
            vec![
                (0, 1, "left".into()),
                (1, 2, "root".into()),
                (2, 3, "right".into()),
                (3, 4, "merge".into()),
            ]
        );
    }

    #[test]
    fn test_resuming_from_serialized_state_is_equivalent() {
        let c4 = commit("c4", &["c3"]);
        let diff = single_parent(Some("c3"), vec![modified("A.txt", &[(2, 1, 2, 1)])]);

        let direct = apply_commit(linear_history(), &[], &c4, &diff);

        let json = serde_json::to_string(&linear_history()).unwrap();
        let restored: BlameState = serde_json::from_str(&json).unwrap();
        let resumed = apply_commit(restored, &[], &c4, &diff);

        assert_eq!(direct.state, resumed.state);
        assert_eq!(direct.delta, resumed.delta);
    }

    #[test]
    fn test_between_lists_changed_files() {
        let main = linear_history();
        let side = apply_commit(
            main.clone(),
            &[],
            &commit("s1", &["c3"]),
            &single_parent(
                Some("c3"),
                vec![modified("A.txt", &[(2, 1, 2, 1)]), added("B.txt", 2)],
            ),
        )
        .state;

        let delta = HunkDelta::between(&side, &main);
        assert_eq!(delta.files.len(), 2);
        let a = delta.files.iter().find(|f| f.path == "A.txt").unwrap();
        assert!(!a.deleted);
        assert_eq!(a.line_count, 6);
        assert_eq!(
            a.removed,
            vec![BlameHunk::new("A.txt", 2, 3, "s1"), BlameHunk::new("A.txt", 3, 4, "c2")]
        );
        assert_eq!(a.added, vec![BlameHunk::new("A.txt", 2, 4, "c2")]);
        let b = delta.files.iter().find(|f| f.path == "B.txt").unwrap();
        assert!(b.deleted);
        assert_eq!(b.removed, vec![BlameHunk::new("B.txt", 0, 2, "s1")]);

        assert!(HunkDelta::between(&main, &main.clone()).files.is_empty());
    }

    #[test]
    fn test_skipped_file_is_attributed_in_full_once_readable() {
        let mut binary = added("data.txt", 0);
        binary.skip_reason = Some("binary file".into());
        binary.new_line_count = None;
        let c1 = apply_commit(
            BlameState::new(),
            &[],
            &commit("c1", &[]),
            &single_parent(None, vec![binary]),
        );
        assert_eq!(c1.skipped.len(), 1);

        // no line hunks against a binary parent blob
        let mut now_text = modified("data.txt", &[]);
        now_text.new_line_count = Some(3);
        let c2 = apply_commit(
            c1.state,
            &[],
            &commit("c2", &["c1"]),
            &single_parent(Some("c1"), vec![now_text]),
        );
        assert!(c2.skipped.is_empty());
        assert_eq!(c2.delta.files[0].added, vec![BlameHunk::new("data.txt", 0, 3, "c2")]);

        let mut edit = modified("data.txt", &[(1, 1, 1, 1)]);
        edit.new_line_count = Some(3);
        let c3 = apply_commit(
            c2.state,
            &[],
            &commit("c3", &["c2"]),
            &single_parent(Some("c2"), vec![edit]),
        );
        assert_eq!(
            owners(c3.state.get("data.txt").unwrap()),
            vec![(0, 1, "c2".into()), (1, 2, "c3".into()), (2, 3, "c2".into())]
        );
    }

    #[test]
    fn test_line_count_mismatch_is_diff_error() {
        let mut edit = modified("A.txt", &[(2, 1, 2, 1)]);
        edit.new_line_count = Some(9);
        let outcome = apply_commit(
            linear_history(),
            &[],
            &commit("c4", &["c3"]),
            &single_parent(Some("c3"), vec![edit]),
        );
        assert_eq!(outcome.skipped.len(), 1);
        assert!(outcome.state.get("A.txt").is_none());
    }

    #[test]
    fn test_lines_per_author_follow_merges_and_deletions() {
        let ada = "Ada <ada@example.com>";
        let bob = "Bob <bob@example.com>";
        let c1 = apply_commit(
            BlameState::new(),
            &[],
            &commit_by("c1", &[], ada),
            &single_parent(None, vec![added("A.txt", 4)]),
        )
        .state;
        let b1 = apply_commit(
            c1.clone(),
            &[],
            &commit_by("b1", &["c1"], bob),
            &single_parent(Some("c1"), vec![modified("A.txt", &[(0, 1, 0, 1)])]),
        )
        .state;
        assert_eq!(b1.lines_per_author().get(bob), Some(&1));
        assert_eq!(b1.lines_per_author().get(ada), Some(&3));

        let c2 = apply_commit(
            c1,
            &[],
            &commit_by("c2", &["c1"], ada),
            &single_parent(Some("c1"), vec![added("B.txt", 2)]),
        )
        .state;
        let merge_diff = CommitDiff {
            parents: vec![
                ParentDiff {
                    parent: Some("c2".into()),
                    files: vec![modified("A.txt", &[(0, 1, 0, 1)])],
                },
                ParentDiff { parent: Some("b1".into()), files: vec![added("B.txt", 2)] },
            ],
        };
        let merged = apply_commit(c2, &[&b1], &commit_by("m", &["c2", "b1"], ada), &merge_diff);
        let expected: BTreeMap<String, u64> =
            [(ada.to_string(), 5), (bob.to_string(), 1)].into_iter().collect();
        assert_eq!(merged.state.lines_per_author(), &expected);

        let deleted = apply_commit(
            merged.state,
            &[],
            &commit_by("c3", &["m"], ada),
            &single_parent(
                Some("m"),
                vec![FileDiff {
                    old_path: Some("A.txt".into()),
                    new_path: None,
                    status: FileStatus::Deleted,
                    hunks: vec![LineHunk { old_start: 0, old_len: 4, new_start: 0, new_len: 0 }],
                    skip_reason: None,
                    new_line_count: None,
                }],
            ),
        );
        let expected: BTreeMap<String, u64> = [(ada.to_string(), 2)].into_iter().collect();
        assert_eq!(deleted.state.lines_per_author(), &expected);
    }
}
