//! Indexing jobs: mirror, walk, blame and write.
//!
//! Each repository runs as a two-stage pipeline. A blocking producer opens
//! the mirror, walks history parent-before-child and diffs every commit; an
//! async consumer applies the diffs to the blame state and writes one graph
//! transaction per commit. The blame state never leaves the consumer.

use crate::commit::convert_commit;
use crate::diff::commit_diff;
use crate::mirror::{GitMirror, MirrorOptions, RepoMirror};
use crate::repository::GitRepository;
use crate::walker::CommitWalker;
use async_trait::async_trait;
use blamegraph_core::config::validate_name;
use blamegraph_core::progress::{DEFAULT_PHASES, PHASE_COMMITS};
use blamegraph_core::service::{IndexService, JobFailure, JobPhase, JobReport, RepositoryMarker};
use blamegraph_core::storage::{Checkpoint, IndexStore};
use blamegraph_core::{
    apply_commit, BlameState, Commit, CommitDiff, Error, HunkDelta, ExtensionClassifier, FileNode,
    IndexMarker, IndexerConfig, LanguageClassifier, ProgressEvent, ProgressReporter, Repository,
    Result, Stakeholder,
};
use futures::future::try_join_all;
use git2::Oid;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Commits buffered between the walker and the blame stage.
const PIPELINE_DEPTH: usize = 32;

/// One repository taking part in a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSpec {
    pub owner: String,
    pub name: String,
    pub local_path: PathBuf,
    pub remote_url: String,
    /// Mirror without network access
    pub local_only: bool,
    /// Walk and write the history, not only mirror it
    pub index: bool,
}

impl RepoSpec {
    pub fn key(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    fn repository(&self) -> Repository {
        Repository::new(
            &self.owner,
            &self.name,
            self.local_path.to_string_lossy(),
            &self.remote_url,
        )
    }
}

/// Where the walk starts and what it needs from the checkpoint.
struct WalkPlan {
    total: usize,
    /// Walked children per parent commit
    children: HashMap<String, usize>,
    /// Whether the checkpoint covers the walk's boundary
    resumed: bool,
    tip: String,
}

struct WalkedCommit {
    commit: Commit,
    diff: CommitDiff,
}

enum Walked {
    Start(WalkPlan),
    Commit(Box<WalkedCommit>),
}

/// Runs indexing jobs against a graph store.
pub struct Orchestrator {
    config: IndexerConfig,
    store: Arc<dyn IndexStore>,
    mirror: Arc<dyn RepoMirror>,
    classifier: Arc<dyn LanguageClassifier>,
    events: broadcast::Sender<ProgressEvent>,
    cancel: CancellationToken,
    job_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Orchestrator {
    pub fn new(config: IndexerConfig, store: Arc<dyn IndexStore>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            config,
            store,
            mirror: Arc::new(GitMirror::new()),
            classifier: Arc::new(ExtensionClassifier),
            events,
            cancel: CancellationToken::new(),
            job_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_mirror(mut self, mirror: Arc<dyn RepoMirror>) -> Self {
        self.mirror = mirror;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn LanguageClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that interrupts running jobs between commits.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Repositories a job for `owner/repo` mirrors, target first.
    ///
    /// The configured base project is mirrored from its local source and is
    /// never fetched over the network.
    pub fn plan(&self, owner: &str, repo: &str) -> Result<Vec<RepoSpec>> {
        validate_name(owner)?;
        validate_name(repo)?;

        let is_base = owner == self.config.base_owner && repo == self.config.base_name;
        let base_source = self
            .config
            .base_source
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned());

        let target = match (&base_source, is_base) {
            (Some(source), true) => RepoSpec {
                owner: owner.to_string(),
                name: repo.to_string(),
                local_path: self.config.mirror_path(owner, repo),
                remote_url: source.clone(),
                local_only: true,
                index: true,
            },
            _ => RepoSpec {
                owner: owner.to_string(),
                name: repo.to_string(),
                local_path: self.config.mirror_path(owner, repo),
                remote_url: self.config.remote_url(owner, repo),
                local_only: false,
                index: true,
            },
        };

        let mut specs = vec![target];
        if let (Some(source), false) = (base_source, is_base) {
            specs.push(RepoSpec {
                owner: self.config.base_owner.clone(),
                name: self.config.base_name.clone(),
                local_path: self
                    .config
                    .mirror_path(&self.config.base_owner, &self.config.base_name),
                remote_url: source,
                local_only: true,
                index: false,
            });
        }
        Ok(specs)
    }

    fn job_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.job_locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    async fn run(
        &self,
        specs: &[RepoSpec],
        progress: &ProgressReporter,
    ) -> std::result::Result<JobReport, JobFailure> {
        let mirrors = specs.iter().map(|spec| async move {
            let options = MirrorOptions::from_config(&self.config, spec.local_only);
            self.mirror
                .ensure_mirror(&spec.local_path, &spec.remote_url, &options)
                .await
        });
        try_join_all(mirrors)
            .await
            .map_err(|e| JobFailure::new(JobPhase::Resolving, e))?;

        for spec in specs {
            self.store
                .upsert_repository(&spec.repository())
                .await
                .map_err(|e| JobFailure::new(JobPhase::Resolving, e))?;
        }

        let pipelines = specs
            .iter()
            .filter(|spec| spec.index)
            .map(|spec| self.index_repository(spec, progress));
        let markers = try_join_all(pipelines).await?;

        let mut report = JobReport::default();
        for (marker, cancelled) in markers {
            report.cancelled |= cancelled;
            report.push(marker);
        }
        Ok(report)
    }

    /// Index one mirror's ref. Returns its marker and whether it was cancelled.
    async fn index_repository(
        &self,
        spec: &RepoSpec,
        progress: &ProgressReporter,
    ) -> std::result::Result<(RepositoryMarker, bool), JobFailure> {
        let key = spec.key();
        let marker = IndexMarker {
            repository: key.clone(),
            ref_name: self.config.git_ref.clone(),
        };
        let walking = |e: Error| JobFailure::new(JobPhase::Walking, e);
        let indexing = |e: Error| JobFailure::new(JobPhase::Indexing, e);
        let reporting = |e: Error| JobFailure::new(JobPhase::Reporting, e);

        info!("Job {}: walking {}", key, marker.ref_name);
        let checkpoint = self.store.load_checkpoint(&marker).await.map_err(walking)?.unwrap_or_default();
        let mut last_written = self
            .store
            .get_repository(&key)
            .await
            .map_err(walking)?
            .and_then(|repo| repo.last_indexed.get(&marker.ref_name).cloned());

        let (tx, mut rx) = mpsc::channel(PIPELINE_DEPTH);
        let path = spec.local_path.clone();
        let git_ref = self.config.git_ref.clone();
        let known: Vec<String> = checkpoint.shas().map(str::to_string).collect();
        let cancel = self.cancel.clone();
        let producer = tokio::task::spawn_blocking(move || {
            if let Err(e) = walk(&path, &git_ref, &known, &tx, &cancel) {
                let _ = tx.blocking_send(Err(e));
            }
        });

        let plan = match rx.recv().await {
            Some(Ok(Walked::Start(plan))) => plan,
            Some(Err(e)) => return Err(walking(e)),
            Some(Ok(Walked::Commit(_))) | None => {
                return Err(walking(Error::Other(anyhow::anyhow!("commit walk ended early"))))
            }
        };
        progress.add_total(PHASE_COMMITS, plan.total as u64);

        let mut result = RepositoryMarker {
            repository: key.clone(),
            ref_name: marker.ref_name.clone(),
            commit_sha: last_written.clone(),
            commits_indexed: 0,
            skipped_files: 0,
        };
        if plan.total == 0 {
            info!("Job {}: {} is up to date at {}", key, marker.ref_name, plan.tip);
            return Ok((result, false));
        }

        // State the graph was last written at, for deltas that do not follow
        // the first parent
        let mut retained = last_written
            .as_ref()
            .and_then(|sha| checkpoint.commits.get(sha).cloned());
        let mut remaining = plan.children;
        let mut states: HashMap<String, BlameState> = if plan.resumed {
            checkpoint
                .commits
                .into_iter()
                .filter(|(sha, _)| remaining.get(sha).copied().unwrap_or(0) > 0)
                .collect()
        } else {
            HashMap::new()
        };
        if plan.resumed {
            debug!("Job {}: resuming from {} checkpoint commit(s)", key, states.len());
        } else {
            info!("Job {}: indexing {} commit(s) from the root", key, plan.total);
        }

        let mut classified: HashSet<String> = HashSet::new();
        let mut cancelled = false;
        info!("Job {}: indexing", key);

        loop {
            let item = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                item = rx.recv() => item,
            };
            let walked = match item {
                Some(Ok(Walked::Commit(walked))) => walked,
                Some(Ok(Walked::Start(_))) => continue,
                Some(Err(e)) => return Err(indexing(e)),
                None => {
                    cancelled = self.cancel.is_cancelled();
                    break;
                }
            };
            let WalkedCommit { mut commit, diff } = *walked;

            let linear = commit.parents.first() == last_written.as_ref();
            let stored = retained.take();
            let view = match (&last_written, linear) {
                (Some(sha), false) => states.get(sha).cloned().or(stored),
                _ => None,
            };

            let mut parents: Vec<(String, BlameState)> = Vec::with_capacity(commit.parents.len());
            for sha in &commit.parents {
                if parents.iter().any(|(seen, _)| seen == sha) {
                    continue;
                }
                let state = take_parent_state(&mut states, &mut remaining, sha).map_err(indexing)?;
                parents.push((sha.clone(), state));
            }
            let mut parents = parents.into_iter().map(|(_, state)| state);
            let base = parents.next().unwrap_or_default();
            let others: Vec<BlameState> = parents.collect();
            let other_refs: Vec<&BlameState> = others.iter().collect();

            let mut outcome = apply_commit(base, &other_refs, &commit, &diff);
            for skipped in &outcome.skipped {
                warn!("Job {}: skipping in {}: {}", key, commit.short_sha(), skipped);
            }
            result.skipped_files += outcome.skipped.len();

            // The stored hunks only line up with this delta when they describe
            // the first parent.
            if !linear {
                if view.is_none() && last_written.is_some() {
                    warn!(
                        "Job {}: no blame state for {}, rewriting every file of {}",
                        key,
                        last_written.as_deref().unwrap_or_default(),
                        commit.short_sha()
                    );
                }
                let from = view.unwrap_or_default();
                outcome.delta = HunkDelta::between(&from, &outcome.state);
            }
            commit.lines_per_author = outcome.state.lines_per_author().clone();

            let files: Vec<FileNode> = outcome
                .delta
                .files
                .iter()
                .filter(|file| !file.deleted)
                .map(|file| {
                    let language = if classified.insert(file.path.clone()) {
                        self.classifier.classify(&file.path)
                    } else {
                        None
                    };
                    FileNode {
                        path: file.path.clone(),
                        language,
                    }
                })
                .collect();
            let stakeholder = Stakeholder::from_signature(&commit.signature);

            self.store
                .commit_transaction(&marker, &commit, &outcome.delta, &stakeholder, &files)
                .await
                .map_err(indexing)?;
            debug!(
                "Job {}: {} {} ({} file(s), +{}/-{} hunk(s))",
                key,
                commit.short_sha(),
                commit.message_header(),
                outcome.delta.files.len(),
                outcome.delta.added().count(),
                outcome.delta.removed().count()
            );

            if remaining.get(&commit.sha).copied().unwrap_or(0) > 0 || commit.sha == plan.tip {
                states.insert(commit.sha.clone(), outcome.state);
            }
            last_written = Some(commit.sha);
            result.commit_sha = last_written.clone();
            result.commits_indexed += 1;
            progress.advance(PHASE_COMMITS, 1);

            if result.commits_indexed % self.config.checkpoint_interval.max(1) == 0 {
                self.save_checkpoint(&marker, &states).await.map_err(indexing)?;
            }
        }

        drop(rx);
        producer
            .await
            .map_err(|e| indexing(Error::Other(anyhow::anyhow!("commit walker failed: {}", e))))?;

        info!("Job {}: reporting", key);
        self.save_checkpoint(&marker, &states).await.map_err(reporting)?;
        if cancelled {
            info!(
                "Job {}: cancelled after {} commit(s), marker at {}",
                key,
                result.commits_indexed,
                result.commit_sha.as_deref().unwrap_or("none")
            );
        }
        Ok((result, cancelled))
    }

    async fn save_checkpoint(&self, marker: &IndexMarker, states: &HashMap<String, BlameState>) -> Result<()> {
        let checkpoint = Checkpoint {
            commits: states.iter().map(|(sha, state)| (sha.clone(), state.clone())).collect(),
        };
        self.store.save_checkpoint(marker, &checkpoint).await
    }
}

#[async_trait]
impl IndexService for Orchestrator {
    async fn index_project(
        &self,
        owner: &str,
        repo: &str,
    ) -> std::result::Result<JobReport, JobFailure> {
        let specs = self
            .plan(owner, repo)
            .map_err(|e| JobFailure::new(JobPhase::Resolving, e))?;
        let key = specs[0].key();

        let lock = self.job_lock(&key);
        let _guard = lock.lock().await;
        info!("Job {}: resolving", key);

        let (progress, aggregator) =
            ProgressReporter::spawn(&DEFAULT_PHASES, self.events.clone(), self.config.progress_interval());
        let result = self.run(&specs, &progress).await;
        match &result {
            Ok(report) if report.cancelled => progress.fail(PHASE_COMMITS, "cancelled"),
            Ok(report) => {
                info!("Job {}: completed, {} commit(s) indexed", key, report.commits_indexed);
                progress.complete();
            }
            Err(failure) => {
                warn!("Job {}: {}", key, failure);
                progress.fail(failure.phase.as_str(), &failure.error);
            }
        }
        drop(progress);
        let _ = aggregator.await;
        result
    }

    fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }
}

/// State of a parent for one of its children; the last child takes it.
fn take_parent_state(
    states: &mut HashMap<String, BlameState>,
    remaining: &mut HashMap<String, usize>,
    sha: &str,
) -> Result<BlameState> {
    let left = match remaining.get_mut(sha) {
        Some(count) => {
            *count = count.saturating_sub(1);
            *count
        }
        None => 0,
    };
    let state = if left == 0 {
        states.remove(sha)
    } else {
        states.get(sha).cloned()
    };
    state.ok_or_else(|| Error::BlameState(format!("no blame state for parent {}", sha)))
}

/// Producer side of the pipeline; runs on a blocking thread.
fn walk(
    path: &std::path::Path,
    git_ref: &str,
    checkpoint: &[String],
    tx: &mpsc::Sender<Result<Walked>>,
    cancel: &CancellationToken,
) -> Result<()> {
    let repo = GitRepository::open(path)?;
    let tip = repo.resolve_ref(git_ref)?;

    let mut known: Vec<Oid> = Vec::with_capacity(checkpoint.len());
    for sha in checkpoint {
        match Oid::from_str(sha) {
            Ok(oid) if repo.contains(sha) => known.push(oid),
            _ => warn!("Checkpoint commit {} is gone from {}", sha, path.display()),
        }
    }
    let complete = known.len() == checkpoint.len();

    let mut walker = CommitWalker::new(repo.inner(), tip, &known)?;
    let mut resumed = !known.is_empty();
    if resumed && (!complete || walker.boundary().any(|oid| !known.contains(&oid))) {
        warn!(
            "Checkpoint for {} does not cover the new history, reindexing from the root",
            path.display()
        );
        walker = CommitWalker::new(repo.inner(), tip, &[])?;
        resumed = false;
    }

    let plan = WalkPlan {
        total: walker.total(),
        children: walker
            .child_counts()
            .map(|(oid, count)| (oid.to_string(), count))
            .collect(),
        resumed,
        tip: tip.to_string(),
    };
    if tx.blocking_send(Ok(Walked::Start(plan))).is_err() {
        return Ok(());
    }

    for commit in walker {
        if cancel.is_cancelled() {
            break;
        }
        let commit = commit?;
        let diff = commit_diff(repo.inner(), &commit)?;
        let walked = WalkedCommit {
            commit: convert_commit(&commit),
            diff,
        };
        if tx.blocking_send(Ok(Walked::Commit(Box::new(walked)))).is_err() {
            break;
        }
    }
    Ok(())
}
