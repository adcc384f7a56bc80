//! Conversion of git2 commits into graph commits.

use blamegraph_core::Commit;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Build a graph [`Commit`] from a git2 commit.
pub fn convert_commit(commit: &git2::Commit<'_>) -> Commit {
    let author = commit.author();
    let name = author.name().unwrap_or("Unknown");
    let signature = match author.email() {
        Some(email) if !email.is_empty() => format!("{} <{}>", name, email),
        _ => name.to_string(),
    };

    let date = DateTime::<Utc>::from_timestamp(author.when().seconds(), 0).unwrap_or_default();

    Commit {
        sha: commit.id().to_string(),
        message: String::from_utf8_lossy(commit.message_bytes()).into_owned(),
        signature,
        date,
        parents: commit.parent_ids().map(|id| id.to_string()).collect(),
        lines_per_author: BTreeMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{Repository, Signature, Time};

    #[test]
    fn test_convert_commit() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init_bare(dir.path()).unwrap();
        let sig = Signature::new("Ada Lovelace", "ada@example.com", &Time::new(1_700_000_000, 0)).unwrap();
        let tree = repo.find_tree(repo.treebuilder(None).unwrap().write().unwrap()).unwrap();
        let oid = repo
            .commit(None, &sig, &sig, "Initial import\n\nDetails", &tree, &[])
            .unwrap();

        let commit = convert_commit(&repo.find_commit(oid).unwrap());
        assert_eq!(commit.sha, oid.to_string());
        assert_eq!(commit.signature, "Ada Lovelace <ada@example.com>");
        assert_eq!(commit.message_header(), "Initial import");
        assert_eq!(commit.date.timestamp(), 1_700_000_000);
        assert!(commit.parents.is_empty());
        assert!(commit.lines_per_author.is_empty());
    }
}
