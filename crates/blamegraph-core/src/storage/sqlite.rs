//! SQLite storage backend implementation.

use crate::blame::{FileDelta, HunkDelta};
use crate::error::{Error, Result};
use crate::model::{
    BlameHunk, Collection, Commit, Direction, EdgeKind, FileNode, IndexMarker, Node, NodeRef,
    Repository, Stakeholder,
};
use crate::storage::traits::{Checkpoint, GraphStats, GraphStore, GraphWriter, RepositoryStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// SQLite-based graph storage.
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open (or create) the graph database at the given path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Create an in-memory SQLite storage (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Initialize the database schema.
    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS repositories (
                key             TEXT PRIMARY KEY,
                owner           TEXT NOT NULL,
                name            TEXT NOT NULL,
                local_path      TEXT NOT NULL,
                remote_url      TEXT NOT NULL,
                updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- Last indexed commit per repository and ref
            CREATE TABLE IF NOT EXISTS index_markers (
                repository      TEXT NOT NULL,
                ref_name        TEXT NOT NULL,
                commit_sha      TEXT NOT NULL,
                updated_at      TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (repository, ref_name)
            );

            CREATE TABLE IF NOT EXISTS blame_checkpoints (
                repository      TEXT NOT NULL,
                ref_name        TEXT NOT NULL,
                state           TEXT NOT NULL,
                updated_at      TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (repository, ref_name)
            );

            CREATE TABLE IF NOT EXISTS commits (
                sha             TEXT PRIMARY KEY,
                message         TEXT NOT NULL,
                signature       TEXT NOT NULL,
                date            TEXT NOT NULL,
                parents         TEXT NOT NULL,
                stakeholder_key TEXT NOT NULL,
                lines_per_author TEXT NOT NULL DEFAULT '{}'
            );

            CREATE INDEX IF NOT EXISTS idx_commits_stakeholder ON commits(stakeholder_key);

            CREATE TABLE IF NOT EXISTS files (
                path            TEXT PRIMARY KEY,
                language        TEXT
            );

            CREATE TABLE IF NOT EXISTS blame_hunks (
                key             TEXT PRIMARY KEY,
                file_path       TEXT NOT NULL,
                start_line      INTEGER NOT NULL,
                end_line        INTEGER NOT NULL,
                commit_sha      TEXT NOT NULL,
                CHECK (start_line >= 0 AND start_line < end_line)
            );

            CREATE INDEX IF NOT EXISTS idx_hunks_file ON blame_hunks(file_path, start_line);
            CREATE INDEX IF NOT EXISTS idx_hunks_commit ON blame_hunks(commit_sha);

            CREATE TABLE IF NOT EXISTS stakeholders (
                key             TEXT PRIMARY KEY,
                signature       TEXT NOT NULL,
                lines           INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS edges (
                edge_kind       TEXT NOT NULL,
                from_key        TEXT NOT NULL,
                to_key          TEXT NOT NULL,
                PRIMARY KEY (edge_kind, from_key, to_key)
            );

            CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(edge_kind, to_key);
            "#,
        )?;

        // databases created before per-author totals were stored
        let has_totals = conn
            .prepare("SELECT 1 FROM pragma_table_info('commits') WHERE name = 'lines_per_author'")?
            .exists([])?;
        if !has_totals {
            conn.execute(
                "ALTER TABLE commits ADD COLUMN lines_per_author TEXT NOT NULL DEFAULT '{}'",
                [],
            )?;
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        lock(&self.conn)
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| Error::StorageWrite("connection mutex poisoned".into()))
}

#[async_trait]
impl GraphWriter for SqliteStorage {
    async fn commit_transaction(
        &self,
        marker: &IndexMarker,
        commit: &Commit,
        delta: &HunkDelta,
        stakeholder: &Stakeholder,
        files: &[FileNode],
    ) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let marker = marker.clone();
        let commit = commit.clone();
        let delta = delta.clone();
        let stakeholder = stakeholder.clone();
        let files = files.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut conn = lock(&conn)?;
            write_commit(&mut conn, &marker, &commit, &delta, &stakeholder, &files).map_err(|e| {
                Error::StorageWrite(format!("commit {}: {}", commit.short_sha(), e))
            })
        })
        .await
        .map_err(|e| Error::StorageWrite(e.to_string()))?
    }
}

fn write_commit(
    conn: &mut Connection,
    marker: &IndexMarker,
    commit: &Commit,
    delta: &HunkDelta,
    stakeholder: &Stakeholder,
    files: &[FileNode],
) -> Result<()> {
    let tx = conn.transaction()?;

    tx.execute(
        r#"
        INSERT INTO commits (sha, message, signature, date, parents, stakeholder_key, lines_per_author)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(sha) DO UPDATE SET
            message = excluded.message,
            signature = excluded.signature,
            date = excluded.date,
            parents = excluded.parents,
            stakeholder_key = excluded.stakeholder_key,
            lines_per_author = excluded.lines_per_author
        "#,
        params![
            commit.sha,
            commit.message,
            commit.signature,
            commit.date.to_rfc3339(),
            serde_json::to_string(&commit.parents)?,
            stakeholder.key,
            serde_json::to_string(&commit.lines_per_author)?,
        ],
    )?;

    tx.execute(
        r#"
        INSERT INTO stakeholders (key, signature, lines) VALUES (?1, ?2, 0)
        ON CONFLICT(key) DO UPDATE SET signature = excluded.signature
        "#,
        params![stakeholder.key, stakeholder.signature],
    )?;
    insert_edge(&tx, EdgeKind::CommitStakeholder, &commit.sha, &stakeholder.key)?;

    for file in files {
        tx.execute(
            r#"
            INSERT INTO files (path, language) VALUES (?1, ?2)
            ON CONFLICT(path) DO UPDATE SET language = COALESCE(excluded.language, files.language)
            "#,
            params![file.path, file.language],
        )?;
    }

    let mut touched_commits = BTreeSet::from([commit.sha.clone()]);
    for file in &delta.files {
        apply_file_delta(&tx, file, &mut touched_commits)?;
    }
    refresh_stakeholder_lines(&tx, &touched_commits)?;

    tx.execute(
        r#"
        INSERT INTO index_markers (repository, ref_name, commit_sha) VALUES (?1, ?2, ?3)
        ON CONFLICT(repository, ref_name) DO UPDATE SET
            commit_sha = excluded.commit_sha,
            updated_at = datetime('now')
        "#,
        params![marker.repository, marker.ref_name, commit.sha],
    )?;

    tx.commit()?;
    debug!(
        "Committed {} ({} files touched)",
        commit.short_sha(),
        delta.files.len()
    );
    Ok(())
}

/// Bring the stored hunks of one file in line with its delta.
fn apply_file_delta(
    tx: &Transaction<'_>,
    file: &FileDelta,
    touched_commits: &mut BTreeSet<String>,
) -> Result<()> {
    if file.deleted {
        for hunk in stored_hunks(tx, &file.path, 0, usize::MAX)? {
            delete_hunk(tx, &hunk)?;
            touched_commits.insert(hunk.commit_sha);
        }
        return Ok(());
    }

    for hunk in &file.removed {
        if let Some(stored) = find_hunk(tx, &hunk.key())? {
            delete_hunk(tx, &stored)?;
            touched_commits.insert(stored.commit_sha);
        }
    }

    for hunk in &file.added {
        for stored in stored_hunks(tx, &file.path, hunk.start, hunk.end)? {
            delete_hunk(tx, &stored)?;
            if stored.start < hunk.start {
                insert_hunk(tx, &BlameHunk::new(&file.path, stored.start, hunk.start, &stored.commit_sha))?;
            }
            if stored.end > hunk.end {
                insert_hunk(tx, &BlameHunk::new(&file.path, hunk.end, stored.end, &stored.commit_sha))?;
            }
            touched_commits.insert(stored.commit_sha);
        }
        insert_hunk(tx, hunk)?;
        touched_commits.insert(hunk.commit_sha.clone());
    }

    // Nothing may survive past the new end of the file.
    for stored in stored_hunks(tx, &file.path, file.line_count, usize::MAX)? {
        delete_hunk(tx, &stored)?;
        if stored.start < file.line_count {
            insert_hunk(tx, &BlameHunk::new(&file.path, stored.start, file.line_count, &stored.commit_sha))?;
        }
        touched_commits.insert(stored.commit_sha);
    }
    Ok(())
}

/// Stored hunks of `path` overlapping `[start, end)`.
fn stored_hunks(conn: &Connection, path: &str, start: usize, end: usize) -> Result<Vec<BlameHunk>> {
    let end = i64::try_from(end).unwrap_or(i64::MAX);
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT file_path, start_line, end_line, commit_sha FROM blame_hunks
        WHERE file_path = ?1 AND start_line < ?3 AND end_line > ?2
        ORDER BY start_line
        "#,
    )?;
    let hunks = stmt
        .query_map(params![path, start as i64, end], hunk_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(hunks)
}

fn find_hunk(conn: &Connection, key: &str) -> Result<Option<BlameHunk>> {
    let hunk = conn
        .query_row(
            "SELECT file_path, start_line, end_line, commit_sha FROM blame_hunks WHERE key = ?1",
            params![key],
            hunk_from_row,
        )
        .optional()?;
    Ok(hunk)
}

fn insert_hunk(tx: &Transaction<'_>, hunk: &BlameHunk) -> Result<()> {
    let key = hunk.key();
    tx.execute(
        r#"
        INSERT OR REPLACE INTO blame_hunks (key, file_path, start_line, end_line, commit_sha)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![key, hunk.path, hunk.start as i64, hunk.end as i64, hunk.commit_sha],
    )?;
    insert_edge(tx, EdgeKind::CommitBlameHunk, &hunk.commit_sha, &key)?;
    insert_edge(tx, EdgeKind::BlameHunkFile, &key, &hunk.path)?;
    Ok(())
}

fn delete_hunk(tx: &Transaction<'_>, hunk: &BlameHunk) -> Result<()> {
    let key = hunk.key();
    tx.execute("DELETE FROM blame_hunks WHERE key = ?1", params![key])?;
    tx.execute(
        "DELETE FROM edges WHERE edge_kind = ?1 AND to_key = ?2",
        params![EdgeKind::CommitBlameHunk.as_str(), key],
    )?;
    tx.execute(
        "DELETE FROM edges WHERE edge_kind = ?1 AND from_key = ?2",
        params![EdgeKind::BlameHunkFile.as_str(), key],
    )?;
    Ok(())
}

fn insert_edge(tx: &Transaction<'_>, kind: EdgeKind, from: &str, to: &str) -> Result<()> {
    tx.execute(
        "INSERT OR IGNORE INTO edges (edge_kind, from_key, to_key) VALUES (?1, ?2, ?3)",
        params![kind.as_str(), from, to],
    )?;
    Ok(())
}

/// Recompute `lines` for the stakeholders of the given commits.
fn refresh_stakeholder_lines(tx: &Transaction<'_>, commits: &BTreeSet<String>) -> Result<()> {
    let mut keys = BTreeSet::new();
    {
        let mut stmt = tx.prepare_cached("SELECT stakeholder_key FROM commits WHERE sha = ?1")?;
        for sha in commits {
            if let Some(key) = stmt
                .query_row(params![sha], |row| row.get::<_, String>(0))
                .optional()?
            {
                keys.insert(key);
            }
        }
    }

    let mut stmt = tx.prepare_cached(
        r#"
        UPDATE stakeholders SET lines = (
            SELECT COALESCE(SUM(h.end_line - h.start_line), 0)
            FROM blame_hunks h JOIN commits c ON c.sha = h.commit_sha
            WHERE c.stakeholder_key = stakeholders.key
        )
        WHERE key = ?1
        "#,
    )?;
    for key in &keys {
        stmt.execute(params![key])?;
    }
    Ok(())
}

fn conversion_error(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn commit_from_row(row: &Row<'_>) -> rusqlite::Result<Commit> {
    let date: String = row.get(3)?;
    let parents: String = row.get(4)?;
    let lines_per_author: String = row.get(5)?;
    Ok(Commit {
        sha: row.get(0)?,
        message: row.get(1)?,
        signature: row.get(2)?,
        date: DateTime::parse_from_rfc3339(&date)
            .map_err(|e| conversion_error(3, e))?
            .with_timezone(&Utc),
        parents: serde_json::from_str(&parents).map_err(|e| conversion_error(4, e))?,
        lines_per_author: serde_json::from_str(&lines_per_author)
            .map_err(|e| conversion_error(5, e))?,
    })
}

fn hunk_from_row(row: &Row<'_>) -> rusqlite::Result<BlameHunk> {
    Ok(BlameHunk {
        path: row.get(0)?,
        start: row.get::<_, i64>(1)? as usize,
        end: row.get::<_, i64>(2)? as usize,
        commit_sha: row.get(3)?,
    })
}

fn read_commit(conn: &Connection, sha: &str) -> Result<Option<Commit>> {
    let commit = conn
        .query_row(
            "SELECT sha, message, signature, date, parents, lines_per_author FROM commits WHERE sha = ?1",
            params![sha],
            commit_from_row,
        )
        .optional()?;
    Ok(commit)
}

fn read_file(conn: &Connection, path: &str) -> Result<Option<FileNode>> {
    let file = conn
        .query_row(
            "SELECT path, language FROM files WHERE path = ?1",
            params![path],
            |row| {
                Ok(FileNode {
                    path: row.get(0)?,
                    language: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(file)
}

fn read_stakeholder(conn: &Connection, key: &str) -> Result<Option<Stakeholder>> {
    let stakeholder = conn
        .query_row(
            "SELECT key, signature, lines FROM stakeholders WHERE key = ?1",
            params![key],
            |row| {
                Ok(Stakeholder {
                    key: row.get(0)?,
                    signature: row.get(1)?,
                    lines: row.get::<_, i64>(2)? as u64,
                })
            },
        )
        .optional()?;
    Ok(stakeholder)
}

fn read_node(conn: &Connection, collection: Collection, key: &str) -> Result<Option<Node>> {
    let node = match collection {
        Collection::Commits => read_commit(conn, key)?.map(Node::Commit),
        Collection::Files => read_file(conn, key)?.map(Node::File),
        Collection::BlameHunks => find_hunk(conn, key)?.map(Node::BlameHunk),
        Collection::Stakeholders => read_stakeholder(conn, key)?.map(Node::Stakeholder),
    };
    Ok(node)
}

fn sort_key(node: &Node) -> (&str, usize) {
    match node {
        Node::Commit(c) => (&c.sha, 0),
        Node::File(f) => (&f.path, 0),
        Node::BlameHunk(h) => (&h.path, h.start),
        Node::Stakeholder(s) => (&s.key, 0),
    }
}

fn count(conn: &Connection, table: &str) -> Result<usize> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
        row.get(0)
    })?;
    Ok(count as usize)
}

#[async_trait]
impl GraphStore for SqliteStorage {
    async fn get_commit(&self, sha: &str) -> Result<Option<Commit>> {
        let conn = self.lock()?;
        read_commit(&conn, sha)
    }

    async fn get_file(&self, path: &str) -> Result<Option<FileNode>> {
        let conn = self.lock()?;
        read_file(&conn, path)
    }

    async fn get_stakeholder(&self, key: &str) -> Result<Option<Stakeholder>> {
        let conn = self.lock()?;
        read_stakeholder(&conn, key)
    }

    async fn hunks_in_file(&self, path: &str) -> Result<Vec<BlameHunk>> {
        let conn = self.lock()?;
        stored_hunks(&conn, path, 0, usize::MAX)
    }

    async fn traverse(
        &self,
        from: &NodeRef,
        edge: EdgeKind,
        direction: Direction,
    ) -> Result<Vec<Node>> {
        let (tail, head) = edge.endpoints();
        let (source, target) = match direction {
            Direction::Outbound => (tail, head),
            Direction::Inbound => (head, tail),
        };
        if from.collection != source {
            return Err(Error::InvalidRequest(format!(
                "{} cannot be followed {:?} from {}",
                edge.as_str(),
                direction,
                from.collection.as_str()
            )));
        }

        let conn = self.lock()?;
        let sql = match direction {
            Direction::Outbound => "SELECT to_key FROM edges WHERE edge_kind = ?1 AND from_key = ?2",
            Direction::Inbound => "SELECT from_key FROM edges WHERE edge_kind = ?1 AND to_key = ?2",
        };
        let mut stmt = conn.prepare(sql)?;
        let keys = stmt
            .query_map(params![edge.as_str(), from.key], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut nodes = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(node) = read_node(&conn, target, &key)? {
                nodes.push(node);
            }
        }
        nodes.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
        Ok(nodes)
    }

    async fn stats(&self) -> Result<GraphStats> {
        let conn = self.lock()?;
        Ok(GraphStats {
            repositories: count(&conn, "repositories")?,
            commits: count(&conn, "commits")?,
            files: count(&conn, "files")?,
            blame_hunks: count(&conn, "blame_hunks")?,
            stakeholders: count(&conn, "stakeholders")?,
            edges: count(&conn, "edges")?,
        })
    }
}

#[async_trait]
impl RepositoryStore for SqliteStorage {
    async fn upsert_repository(&self, repository: &Repository) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO repositories (key, owner, name, local_path, remote_url)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(key) DO UPDATE SET
                local_path = excluded.local_path,
                remote_url = excluded.remote_url,
                updated_at = datetime('now')
            "#,
            params![
                repository.key(),
                repository.owner,
                repository.name,
                repository.local_path,
                repository.remote_url,
            ],
        )?;
        Ok(())
    }

    async fn get_repository(&self, key: &str) -> Result<Option<Repository>> {
        let conn = self.lock()?;
        let repository = conn
            .query_row(
                "SELECT owner, name, local_path, remote_url FROM repositories WHERE key = ?1",
                params![key],
                |row| {
                    Ok(Repository::new(
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some(mut repository) = repository else {
            return Ok(None);
        };
        let mut stmt =
            conn.prepare("SELECT ref_name, commit_sha FROM index_markers WHERE repository = ?1")?;
        repository.last_indexed = stmt
            .query_map(params![key], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(Some(repository))
    }

    async fn load_checkpoint(&self, marker: &IndexMarker) -> Result<Option<Checkpoint>> {
        let conn = self.lock()?;
        let state: Option<String> = conn
            .query_row(
                "SELECT state FROM blame_checkpoints WHERE repository = ?1 AND ref_name = ?2",
                params![marker.repository, marker.ref_name],
                |row| row.get(0),
            )
            .optional()?;
        match state {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn save_checkpoint(&self, marker: &IndexMarker, checkpoint: &Checkpoint) -> Result<()> {
        let json = serde_json::to_string(checkpoint)?;
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO blame_checkpoints (repository, ref_name, state) VALUES (?1, ?2, ?3)
            ON CONFLICT(repository, ref_name) DO UPDATE SET
                state = excluded.state,
                updated_at = datetime('now')
            "#,
            params![marker.repository, marker.ref_name, json],
        )?;
        Ok(())
    }
}
