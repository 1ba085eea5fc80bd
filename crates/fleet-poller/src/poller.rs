use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use chrono::{DateTime, Utc};
use fleet_types::StatusResponse;
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    source::StatusSource,
    state::{NextStep, PollerConfig, PollerPhase, PollerState},
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollerStats {
    pub total_polls: u64,
    pub successes: u64,
    pub failures: u64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// What a consumer sees. `last_good` is only replaced by a successful poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerSnapshot {
    pub phase: PollerPhase,
    pub consecutive_errors: u32,
    pub next_delay: Option<Duration>,
    pub stats: PollerStats,
    pub last_good: Option<StatusResponse>,
}

struct Shared {
    state: PollerState,
    stats: PollerStats,
    next_delay: Option<Duration>,
    last_good: Option<StatusResponse>,
}

impl Shared {
    fn snapshot(&self) -> PollerSnapshot {
        PollerSnapshot {
            phase: self.state.phase(),
            consecutive_errors: self.state.consecutive_errors(),
            next_delay: self.next_delay,
            stats: self.stats.clone(),
            last_good: self.last_good.clone(),
        }
    }
}

#[derive(Clone)]
struct Core {
    shared: Arc<Mutex<Shared>>,
    tx: Arc<watch::Sender<PollerSnapshot>>,
}

impl Core {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, shared: &Shared) {
        self.tx.send_replace(shared.snapshot());
    }

    /// Runs `f` only if the session that armed the caller is still current.
    fn apply<T>(&self, generation: u64, f: impl FnOnce(&mut Shared) -> T) -> Option<T> {
        let mut shared = self.lock();
        if shared.state.generation() != generation {
            return None;
        }
        let out = f(&mut shared);
        self.publish(&shared);
        Some(out)
    }
}

enum Step {
    Poll,
    Resume,
}

/// Single cooperative polling loop over a [`StatusSource`].
///
/// `activate` and `deactivate` are the only mutators. At most one loop task exists, and
/// it is aborted before a new one is armed, so fetches never overlap.
pub struct AdaptivePoller<S: StatusSource> {
    source: Arc<S>,
    core: Core,
    task: Option<JoinHandle<()>>,
}

impl<S: StatusSource> AdaptivePoller<S> {
    pub fn new(source: S, cfg: PollerConfig) -> Self {
        let shared = Shared {
            state: PollerState::new(cfg),
            stats: PollerStats::default(),
            next_delay: None,
            last_good: None,
        };
        let (tx, _rx) = watch::channel(shared.snapshot());
        Self {
            source: Arc::new(source),
            core: Core {
                shared: Arc::new(Mutex::new(shared)),
                tx: Arc::new(tx),
            },
            task: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PollerSnapshot> {
        self.core.tx.subscribe()
    }

    pub fn snapshot(&self) -> PollerSnapshot {
        self.core.lock().snapshot()
    }

    pub fn is_active(&self) -> bool {
        self.core.lock().state.is_active()
    }

    /// True while a loop task is armed. Always false after `deactivate`.
    pub fn has_pending_poll(&self) -> bool {
        self.task.is_some()
    }

    /// Idle -> Waiting. No-op when already active.
    pub fn activate(&mut self) {
        let (generation, delay) = {
            let mut shared = self.core.lock();
            if shared.state.is_active() {
                return;
            }
            let delay = shared.state.activate();
            shared.next_delay = Some(delay);
            self.core.publish(&shared);
            (shared.state.generation(), delay)
        };

        if let Some(old) = self.task.take() {
            old.abort();
        }
        tracing::debug!(generation, delay_ms = delay.as_millis() as u64, "poller activated");
        self.task = Some(tokio::spawn(run_loop(
            self.source.clone(),
            self.core.clone(),
            generation,
            delay,
        )));
    }

    /// Any -> Idle. Synchronous: once this returns no fetch or transition can happen.
    pub fn deactivate(&mut self) {
        {
            let mut shared = self.core.lock();
            shared.state.deactivate();
            shared.next_delay = None;
            self.core.publish(&shared);
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        tracing::debug!("poller deactivated");
    }
}

impl<S: StatusSource> Drop for AdaptivePoller<S> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_loop<S: StatusSource>(source: Arc<S>, core: Core, generation: u64, first: Duration) {
    let mut delay = first;
    let mut step = Step::Poll;

    loop {
        tokio::time::sleep(delay).await;

        if let Step::Resume = step {
            let Some(d) = core.apply(generation, |s| {
                let d = s.state.resume();
                s.next_delay = Some(d);
                d
            }) else {
                return;
            };
            tracing::info!("poller resuming after pause");
            delay = d;
            step = Step::Poll;
            continue;
        }

        let Some(token) = core.apply(generation, |s| {
            s.state.begin_poll();
            s.next_delay = None;
            s.state.last_update_token().map(str::to_string)
        }) else {
            return;
        };

        let result = source.fetch(token.as_deref()).await;

        let Some((d, next_step)) = core.apply(generation, |s| {
            s.stats.total_polls += 1;
            let next = match result {
                Ok(resp) => {
                    s.stats.successes += 1;
                    s.stats.last_success_at = Some(Utc::now());
                    let d = s.state.on_success(resp.update_token());
                    s.last_good = Some(resp);
                    (d, Step::Poll)
                }
                Err(err) => {
                    s.stats.failures += 1;
                    s.stats.last_error = Some(err.to_string());
                    match s.state.on_failure() {
                        NextStep::Poll(d) => {
                            tracing::warn!(
                                %err,
                                errors = s.state.consecutive_errors(),
                                retry_ms = d.as_millis() as u64,
                                "status poll failed"
                            );
                            (d, Step::Poll)
                        }
                        NextStep::Resume(d) => {
                            tracing::warn!(
                                %err,
                                errors = s.state.consecutive_errors(),
                                cooldown_ms = d.as_millis() as u64,
                                "status poll failing repeatedly, pausing"
                            );
                            (d, Step::Resume)
                        }
                    }
                }
            };
            s.next_delay = Some(next.0);
            next
        }) else {
            return;
        };

        delay = d;
        step = next_step;
    }
}
