//! Phase progress aggregation.
//!
//! Producers hold a cheap [`ProgressReporter`] handle and send commands to a
//! dedicated aggregation task, which owns the counters and publishes
//! coalesced [`ProgressEvent`]s on a broadcast channel.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

pub const PHASE_COMMITS: &str = "commits";
pub const PHASE_ISSUES: &str = "issues";
pub const PHASE_BUILDS: &str = "builds";

/// Phases registered for every indexing job.
pub const DEFAULT_PHASES: [&str; 3] = [PHASE_COMMITS, PHASE_ISSUES, PHASE_BUILDS];

/// Counters of one phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseProgress {
    pub completed: u64,
    pub total: u64,
}

impl PhaseProgress {
    pub fn is_done(&self) -> bool {
        self.completed >= self.total
    }
}

/// Event published to progress subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProgressEvent {
    Progress {
        phases: BTreeMap<String, PhaseProgress>,
    },
    Failed {
        phase: String,
        error: String,
    },
    Completed {
        phases: BTreeMap<String, PhaseProgress>,
    },
}

impl ProgressEvent {
    /// Event name used on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            ProgressEvent::Progress { .. } => "progress",
            ProgressEvent::Failed { .. } => "failed",
            ProgressEvent::Completed { .. } => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProgressEvent::Progress { .. })
    }
}

enum Command {
    AddTotal { phase: String, delta: u64 },
    Advance { phase: String, delta: u64 },
    Fail { phase: String, error: String },
    Complete,
    Snapshot(oneshot::Sender<BTreeMap<String, PhaseProgress>>),
}

/// Handle for reporting progress of one job.
#[derive(Clone)]
pub struct ProgressReporter {
    tx: mpsc::UnboundedSender<Command>,
}

impl ProgressReporter {
    /// Start the aggregation task with `phases` registered at total 0.
    ///
    /// Progress events are emitted at most once per `interval`; terminal
    /// events are emitted immediately. The task ends once every handle is dropped.
    pub fn spawn(
        phases: &[&str],
        events: broadcast::Sender<ProgressEvent>,
        interval: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let aggregator = Aggregator {
            phases: phases
                .iter()
                .map(|p| (p.to_string(), PhaseProgress::default()))
                .collect(),
            events,
            dirty: false,
            completion_requested: false,
            finished: false,
        };
        let handle = tokio::spawn(aggregator.run(rx, interval));
        (Self { tx }, handle)
    }

    /// Declare `delta` more units of work for a phase.
    pub fn add_total(&self, phase: &str, delta: u64) {
        self.send(Command::AddTotal {
            phase: phase.to_string(),
            delta,
        });
    }

    /// Mark `delta` units of work as done.
    pub fn advance(&self, phase: &str, delta: u64) {
        self.send(Command::Advance {
            phase: phase.to_string(),
            delta,
        });
    }

    /// Emit a terminal failure event.
    pub fn fail(&self, phase: &str, error: impl ToString) {
        self.send(Command::Fail {
            phase: phase.to_string(),
            error: error.to_string(),
        });
    }

    /// Emit a terminal success event once every phase is done.
    pub fn complete(&self) {
        self.send(Command::Complete);
    }

    /// Current counters.
    pub async fn snapshot(&self) -> BTreeMap<String, PhaseProgress> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx));
        rx.await.unwrap_or_default()
    }

    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            debug!("progress aggregator already stopped");
        }
    }
}

struct Aggregator {
    phases: BTreeMap<String, PhaseProgress>,
    events: broadcast::Sender<ProgressEvent>,
    dirty: bool,
    completion_requested: bool,
    finished: bool,
}

impl Aggregator {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(command) => self.handle(command),
                    None => {
                        self.flush();
                        break;
                    }
                },
                _ = ticker.tick(), if self.dirty => self.flush(),
            }
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Snapshot(reply) => {
                let _ = reply.send(self.phases.clone());
            }
            _ if self.finished => {}
            Command::AddTotal { phase, delta } => {
                self.phases.entry(phase).or_default().total += delta;
                self.dirty = true;
            }
            Command::Advance { phase, delta } => {
                let Some(progress) = self.phases.get_mut(&phase) else {
                    warn!("progress for unregistered phase {}", phase);
                    return;
                };
                let next = progress.completed.saturating_add(delta).min(progress.total);
                if next != progress.completed {
                    progress.completed = next;
                    self.dirty = true;
                }
                self.try_complete();
            }
            Command::Fail { phase, error } => {
                self.flush();
                self.finished = true;
                self.publish(ProgressEvent::Failed { phase, error });
            }
            Command::Complete => {
                self.completion_requested = true;
                if !self.try_complete() {
                    debug!("completion deferred until all phases are done");
                }
            }
        }
    }

    fn try_complete(&mut self) -> bool {
        if !self.completion_requested || !self.phases.values().all(PhaseProgress::is_done) {
            return false;
        }
        self.finished = true;
        self.dirty = false;
        self.publish(ProgressEvent::Completed {
            phases: self.phases.clone(),
        });
        true
    }

    fn flush(&mut self) {
        if !self.dirty {
            return;
        }
        self.dirty = false;
        self.publish(ProgressEvent::Progress {
            phases: self.phases.clone(),
        });
    }

    fn publish(&self, event: ProgressEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
