//! Local bare mirrors of remote repositories.

use crate::repository::{classify, GitError};
use async_trait::async_trait;
use blamegraph_core::{Error, IndexerConfig, MirrorOutcome, Result};
use git2::build::{CloneLocal, RepoBuilder};
use git2::{Cred, CredentialType, ErrorClass, ErrorCode, FetchOptions, RemoteCallbacks, Repository};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::RetryIf;
use tracing::{debug, info, warn};

const MIRROR_REFSPECS: [&str; 2] = ["+refs/heads/*:refs/heads/*", "+refs/tags/*:refs/tags/*"];
const MAX_CREDENTIAL_ATTEMPTS: usize = 3;

/// Extra time the blocking transfer gets to notice its own deadline, and the
/// least it is waited for once it overran.
const DEADLINE_GRACE: Duration = Duration::from_secs(5);

/// How a mirror is created and refreshed.
#[derive(Debug, Clone)]
pub struct MirrorOptions {
    /// Mirror an already-present local repository without network access
    pub local_only: bool,
    /// Bound on a single clone or fetch attempt
    pub timeout: Duration,
    /// Retries after a retryable failure
    pub retries: usize,
    /// First retry delay; later delays double
    pub backoff: Duration,
}

impl MirrorOptions {
    pub fn from_config(config: &IndexerConfig, local_only: bool) -> Self {
        Self {
            local_only,
            timeout: config.network_timeout(),
            retries: config.network_retries,
            backoff: config.retry_backoff(),
        }
    }
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self::from_config(&IndexerConfig::default(), false)
    }
}

/// Keeps a local, fetchable copy of a repository current.
#[async_trait]
pub trait RepoMirror: Send + Sync {
    /// Clone into `local_path` when absent, fetch otherwise.
    async fn ensure_mirror(
        &self,
        local_path: &Path,
        remote_url: &str,
        options: &MirrorOptions,
    ) -> Result<MirrorOutcome>;
}

/// libgit2-backed mirror. Calls for the same path are serialized.
#[derive(Default)]
pub struct GitMirror {
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl GitMirror {
    pub fn new() -> Self {
        Self::default()
    }

    fn path_lock(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(path.to_path_buf()).or_default())
    }
}

#[async_trait]
impl RepoMirror for GitMirror {
    async fn ensure_mirror(
        &self,
        local_path: &Path,
        remote_url: &str,
        options: &MirrorOptions,
    ) -> Result<MirrorOutcome> {
        if options.local_only {
            if is_network_url(remote_url) {
                return Err(Error::Config(format!(
                    "local-only mirror cannot use network url {}",
                    remote_url
                )));
            }
            let source = Path::new(remote_url.strip_prefix("file://").unwrap_or(remote_url));
            if !source.exists() {
                return Err(Error::NotFound(format!("local source {}", source.display())));
            }
        }

        let lock = self.path_lock(local_path);
        let _guard = lock.lock().await;

        let factor = (options.backoff.as_millis() as u64 / 2).max(1);
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(Duration::from_secs(30))
            .take(options.retries);

        let outcome = RetryIf::spawn(
            strategy,
            || attempt(local_path.to_path_buf(), remote_url.to_string(), options.clone()),
            |e: &Error| {
                let retry = e.is_retryable();
                if retry {
                    warn!("Mirror attempt for {} failed, retrying: {}", local_path.display(), e);
                }
                retry
            },
        )
        .await?;

        info!("Mirror {}: {}", local_path.display(), outcome);
        Ok(outcome)
    }
}

async fn attempt(local_path: PathBuf, remote_url: String, options: MirrorOptions) -> Result<MirrorOutcome> {
    let timeout = options.timeout;
    let deadline = Instant::now() + timeout;
    let abort = Arc::new(AtomicBool::new(false));
    let stop = Arc::clone(&abort);
    let mirror_display = local_path.display().to_string();
    let mut work = tokio::task::spawn_blocking(move || {
        sync_mirror(&local_path, &remote_url, &options, deadline, &stop)
    });

    let joined = match tokio::time::timeout(timeout + timeout.min(DEADLINE_GRACE), &mut work).await {
        Ok(joined) => joined,
        Err(_) => {
            // The transfer still owns the mirror directory; a retry must not
            // start until it has given up.
            abort.store(true, Ordering::Relaxed);
            warn!("Mirror {} timed out after {:?}, waiting for the transfer to stop", mirror_display, timeout);
            let wait = timeout.max(DEADLINE_GRACE);
            return match tokio::time::timeout(wait, work).await {
                Ok(_) => Err(Error::Network(format!("mirror timed out after {:?}", timeout))),
                Err(_) => Err(Error::Other(anyhow::anyhow!(
                    "mirror transfer into {} still running {:?} after its deadline",
                    mirror_display,
                    wait
                ))),
            };
        }
    };
    joined.map_err(|e| Error::Other(anyhow::anyhow!("mirror task failed: {}", e)))?
}

fn sync_mirror(
    path: &Path,
    url: &str,
    options: &MirrorOptions,
    deadline: Instant,
    abort: &Arc<AtomicBool>,
) -> Result<MirrorOutcome> {
    if path.exists() {
        let repo = Repository::open_bare(path).map_err(|e| {
            Error::Disk(format!("{} is not a usable mirror: {}", path.display(), e.message()))
        })?;
        fetch(&repo, url, options, deadline, abort)
    } else {
        clone(path, url, options, deadline, abort)
    }
}

fn clone(
    path: &Path,
    url: &str,
    options: &MirrorOptions,
    deadline: Instant,
    abort: &Arc<AtomicBool>,
) -> Result<MirrorOutcome> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::Disk(e.to_string()))?;
    }
    debug!("Cloning {} into {}", url, path.display());

    let mut builder = RepoBuilder::new();
    builder
        .bare(true)
        .remote_create(|repo, name, url| repo.remote_with_fetch(name, url, MIRROR_REFSPECS[0]));
    if options.local_only {
        builder.clone_local(CloneLocal::Local);
    } else {
        builder.fetch_options(fetch_options(deadline, Arc::clone(abort)));
    }

    match builder.clone(url, path) {
        Ok(_) => Ok(MirrorOutcome::Cloned),
        Err(e) => {
            // A half-written mirror would be taken for a complete one next time.
            if path.exists() {
                if let Err(cleanup) = std::fs::remove_dir_all(path) {
                    warn!("Failed to remove partial mirror {}: {}", path.display(), cleanup);
                }
            }
            Err(classify(e))
        }
    }
}

fn fetch(
    repo: &Repository,
    url: &str,
    options: &MirrorOptions,
    deadline: Instant,
    abort: &Arc<AtomicBool>,
) -> Result<MirrorOutcome> {
    debug!("Fetching {} into {}", url, repo.path().display());
    let before = ref_snapshot(repo)?;

    let mut remote = repo.remote_anonymous(url).map_err(classify)?;
    let mut fetch_opts = if options.local_only {
        FetchOptions::new()
    } else {
        fetch_options(deadline, Arc::clone(abort))
    };
    remote
        .fetch(&MIRROR_REFSPECS, Some(&mut fetch_opts), None)
        .map_err(classify)?;

    let after = ref_snapshot(repo)?;
    Ok(if before == after {
        MirrorOutcome::UpToDate
    } else {
        MirrorOutcome::Fetched
    })
}

fn ref_snapshot(repo: &Repository) -> Result<BTreeMap<String, git2::Oid>> {
    let references = repo.references().map_err(|e| Error::from(GitError::from(e)))?;
    Ok(references
        .filter_map(|r| {
            let r = r.ok()?;
            Some((r.name()?.to_string(), r.target()?))
        })
        .collect())
}

fn fetch_options<'a>(deadline: Instant, abort: Arc<AtomicBool>) -> FetchOptions<'a> {
    let mut callbacks = RemoteCallbacks::new();
    let mut attempts = 0;
    callbacks.credentials(move |url, username, allowed| {
        attempts += 1;
        if attempts > MAX_CREDENTIAL_ATTEMPTS {
            return Err(git2::Error::new(ErrorCode::Auth, ErrorClass::Net, "credentials rejected"));
        }
        if allowed.contains(CredentialType::SSH_KEY) {
            if let Some(user) = username {
                return Cred::ssh_key_from_agent(user);
            }
        }
        if allowed.contains(CredentialType::DEFAULT) {
            return Cred::default();
        }
        Err(git2::Error::new(
            ErrorCode::Auth,
            ErrorClass::Net,
            format!("no credentials available for {}", url),
        ))
    });
    callbacks.transfer_progress(move |_| Instant::now() < deadline && !abort.load(Ordering::Relaxed));

    let mut opts = FetchOptions::new();
    opts.remote_callbacks(callbacks);
    opts
}

/// Whether `url` needs the network (as opposed to a local path or `file://`).
pub fn is_network_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    if ["http://", "https://", "ssh://", "git://", "git+ssh://"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return true;
    }
    // scp-like `user@host:path`
    !url.contains("://")
        && url
            .split_once(':')
            .map(|(host, _)| host.contains('@'))
            .unwrap_or(false)
}
