use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    pub base_interval: Duration,
    /// Failures beyond this count switch from the base interval to exponential backoff.
    pub backoff_threshold: u32,
    /// Failures beyond this count pause polling for `pause_cooldown`.
    pub pause_threshold: u32,
    pub max_backoff: Duration,
    pub pause_cooldown: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(5),
            backoff_threshold: 3,
            pause_threshold: 10,
            max_backoff: Duration::from_secs(5 * 60),
            pause_cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerPhase {
    Idle,
    Waiting,
    Polling,
    Backoff,
    Paused,
}

/// What the driver arms after a failed poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    Poll(Duration),
    Resume(Duration),
}

/// Transition table for one polling session. Owns no timers; the driver arms them.
///
/// Every `activate`/`deactivate` bumps `generation`, so results tagged with an older
/// generation can be recognised and dropped.
#[derive(Debug, Clone)]
pub struct PollerState {
    cfg: PollerConfig,
    phase: PollerPhase,
    last_update_token: Option<String>,
    consecutive_errors: u32,
    generation: u64,
}

impl PollerState {
    pub fn new(cfg: PollerConfig) -> Self {
        Self {
            cfg,
            phase: PollerPhase::Idle,
            last_update_token: None,
            consecutive_errors: 0,
            generation: 0,
        }
    }

    pub fn phase(&self) -> PollerPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase != PollerPhase::Idle
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn last_update_token(&self) -> Option<&str> {
        self.last_update_token.as_deref()
    }

    /// Idle -> Waiting. Returns the delay before the first poll.
    pub fn activate(&mut self) -> Duration {
        self.generation = self.generation.wrapping_add(1);
        self.phase = PollerPhase::Waiting;
        self.cfg.base_interval
    }

    /// Any -> Idle.
    pub fn deactivate(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.phase = PollerPhase::Idle;
    }

    pub fn begin_poll(&mut self) {
        self.phase = PollerPhase::Polling;
    }

    /// Success always returns to the base cadence.
    pub fn on_success(&mut self, token: String) -> Duration {
        self.consecutive_errors = 0;
        self.last_update_token = Some(token);
        self.phase = PollerPhase::Waiting;
        self.cfg.base_interval
    }

    pub fn on_failure(&mut self) -> NextStep {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);

        if self.consecutive_errors > self.cfg.pause_threshold {
            self.phase = PollerPhase::Paused;
            return NextStep::Resume(self.cfg.pause_cooldown);
        }

        self.phase = PollerPhase::Backoff;
        NextStep::Poll(self.retry_delay())
    }

    /// Paused -> Waiting with a fresh error count.
    pub fn resume(&mut self) -> Duration {
        self.consecutive_errors = 0;
        self.phase = PollerPhase::Waiting;
        self.cfg.base_interval
    }

    /// `base * 2^errors` capped at `max_backoff` once past the backoff threshold.
    pub fn retry_delay(&self) -> Duration {
        if self.consecutive_errors <= self.cfg.backoff_threshold {
            return self.cfg.base_interval;
        }
        let pow = self.consecutive_errors.min(30);
        let base_ms = self.cfg.base_interval.as_millis().min(u64::MAX as u128) as u64;
        let ms = base_ms.saturating_mul(1u64 << pow);
        Duration::from_millis(ms).min(self.cfg.max_backoff)
    }
}
