//! Per-parent diff extraction.
//!
//! Diffs are computed tree-to-tree with zero context lines, rename detection
//! enabled, and converted into the 0-based line hunks the blame engine
//! consumes.

use crate::repository::Result;
use blamegraph_core::blame::{CommitDiff, FileDiff, FileStatus, LineHunk, ParentDiff};
use git2::{Delta, DiffFindOptions, DiffOptions, FileMode, Oid, Patch, Repository, Tree};
use std::path::Path;

/// Diffs of `commit` against each parent, first parent first.
///
/// A root commit yields a single diff against the empty tree.
pub fn commit_diff(repo: &Repository, commit: &git2::Commit<'_>) -> Result<CommitDiff> {
    let tree = commit.tree()?;
    if commit.parent_count() == 0 {
        return Ok(CommitDiff {
            parents: vec![ParentDiff {
                parent: None,
                files: tree_diff(repo, None, &tree)?,
            }],
        });
    }

    let mut parents = Vec::with_capacity(commit.parent_count());
    for parent in commit.parents() {
        let parent_tree = parent.tree()?;
        parents.push(ParentDiff {
            parent: Some(parent.id().to_string()),
            files: tree_diff(repo, Some(&parent_tree), &tree)?,
        });
    }
    Ok(CommitDiff { parents })
}

fn tree_diff(repo: &Repository, old: Option<&Tree<'_>>, new: &Tree<'_>) -> Result<Vec<FileDiff>> {
    let mut opts = DiffOptions::new();
    opts.context_lines(0).ignore_submodules(true);
    let mut diff = repo.diff_tree_to_tree(old, Some(new), Some(&mut opts))?;

    let mut find = DiffFindOptions::new();
    find.renames(true);
    diff.find_similar(Some(&mut find))?;

    let mut files = Vec::new();
    for idx in 0..diff.deltas().len() {
        let Some(delta) = diff.get_delta(idx) else {
            continue;
        };
        if delta.new_file().mode() == FileMode::Commit || delta.old_file().mode() == FileMode::Commit {
            continue;
        }
        let status = match delta.status() {
            Delta::Added => FileStatus::Added,
            Delta::Deleted => FileStatus::Deleted,
            Delta::Modified | Delta::Typechange => FileStatus::Modified,
            Delta::Renamed => FileStatus::Renamed,
            Delta::Copied => FileStatus::Copied,
            _ => continue,
        };
        let old_path = delta.old_file().path().map(path_string);
        let new_path = delta.new_file().path().map(path_string);
        let (old_path, new_path) = match status {
            FileStatus::Added => (None, new_path),
            FileStatus::Deleted => (old_path, None),
            _ => (old_path, new_path),
        };

        let mut file = FileDiff {
            old_path,
            new_path,
            status,
            hunks: Vec::new(),
            skip_reason: None,
            new_line_count: None,
        };

        if status != FileStatus::Deleted {
            let new_id = delta.new_file().id();
            if is_binary_blob(repo, new_id) {
                file.skip_reason = Some("binary file".to_string());
                files.push(file);
                continue;
            }
            file.new_line_count = blob_line_count(repo, new_id);
        }

        // A binary old side has no lines to diff against; the new content
        // is taken whole.
        let binary_old = status != FileStatus::Deleted
            && (delta.flags().is_binary() || is_binary_blob(repo, delta.old_file().id()));
        if !binary_old {
            match Patch::from_diff(&diff, idx) {
                Ok(Some(patch)) => match patch_hunks(&patch) {
                    Ok(hunks) => file.hunks = hunks,
                    Err(e) => file.skip_reason = Some(e.message().to_string()),
                },
                Ok(None) => {}
                Err(e) => file.skip_reason = Some(e.message().to_string()),
            }
        }
        files.push(file);
    }
    Ok(files)
}

fn patch_hunks(patch: &Patch<'_>) -> std::result::Result<Vec<LineHunk>, git2::Error> {
    let mut hunks = Vec::with_capacity(patch.num_hunks());
    for idx in 0..patch.num_hunks() {
        let (hunk, _) = patch.hunk(idx)?;
        hunks.push(LineHunk {
            old_start: zero_based(hunk.old_start(), hunk.old_lines()),
            old_len: hunk.old_lines() as usize,
            new_start: zero_based(hunk.new_start(), hunk.new_lines()),
            new_len: hunk.new_lines() as usize,
        });
    }
    Ok(hunks)
}

fn is_binary_blob(repo: &Repository, id: Oid) -> bool {
    !id.is_zero() && repo.find_blob(id).map(|blob| blob.is_binary()).unwrap_or(false)
}

fn blob_line_count(repo: &Repository, id: Oid) -> Option<usize> {
    if id.is_zero() {
        return Some(0);
    }
    let blob = repo.find_blob(id).ok()?;
    Some(line_count(blob.content()))
}

/// Newline-terminated lines plus a trailing unterminated one.
fn line_count(content: &[u8]) -> usize {
    let newlines = content.iter().filter(|b| **b == b'\n').count();
    match content.last() {
        Some(b'\n') | None => newlines,
        Some(_) => newlines + 1,
    }
}

/// Unified-diff starts are 1-based, except that an empty side names the
/// line *after which* the change happens.
fn zero_based(start: u32, lines: u32) -> usize {
    if lines == 0 {
        start as usize
    } else {
        start.saturating_sub(1) as usize
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
