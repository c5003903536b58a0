/// The reload state machine.
///
/// Once per tick the controller:
///   1. snapshots the working tree (when a poll is due) and, on any difference,
///      stops the child and re-arms the debounce timer;
///   2. holds off until the tree has been quiet for the debounce interval;
///   3. restarts the child and either notifies immediately or enters the
///      readiness wait;
///   4. advances the readiness wait (port reachable / output seen / timeout).
///
/// All I/O goes through the four traits below so the state machine can be
/// driven deterministically in tests by passing explicit `now` instants.
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::snapshot::Snapshot;

/// Upper bound on the tick interval so readiness checks stay responsive even
/// when the poll interval is long.
pub const MAX_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// How long to wait for the child to become ready when no timeout is configured.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

pub trait SnapshotSource {
    /// Never fails; an empty snapshot stands in for "could not query".
    async fn snapshot(&mut self) -> Snapshot;
}

pub trait ProcessControl {
    /// Stops any previous child, then launches a new one.
    /// Returns `false` if the spawn failed (already logged).
    async fn start(&mut self) -> bool;
    /// Stops the current child, if any.  A no-op otherwise.
    async fn stop(&mut self);
    /// Whether the current launch has printed a line matching the readiness pattern.
    fn output_ready(&self) -> bool;
    /// Notices a child that exited on its own.
    fn reap(&mut self);
}

pub trait ReadinessProbe {
    async fn is_reachable(&self, port: u16) -> bool;
}

pub trait Notify {
    async fn notify(&self);
}

/// Returns the tick interval for a given poll interval.
pub fn tick_interval(poll_interval: Duration) -> Duration {
    poll_interval.min(MAX_TICK_INTERVAL)
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub poll_interval: Duration,
    pub debounce: Duration,
    pub port: Option<u16>,
    pub ready_timeout: Duration,
    /// The process supervisor is scanning output for a readiness pattern.
    pub wait_for_output: bool,
}

impl ControllerSettings {
    fn waits_for_readiness(&self) -> bool {
        self.port.is_some() || self.wait_for_output
    }
}

/// Post-start readiness sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    WaitingForReady { since: Instant },
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Settled,
    /// A restart is owed once `due` has passed.
    Pending { due: Instant },
}

pub struct Controller<S, P, R, N> {
    settings: ControllerSettings,
    source: S,
    process: P,
    probe: R,
    notifier: N,
    previous: Option<Snapshot>,
    last_poll: Option<Instant>,
    nudged: bool,
    gate: Gate,
    phase: Phase,
}

impl<S, P, R, N> Controller<S, P, R, N>
where
    S: SnapshotSource,
    P: ProcessControl,
    R: ReadinessProbe,
    N: Notify,
{
    /// The restart gate starts open at `now`, so the first tick launches the
    /// child without waiting out a debounce interval.
    pub fn new(
        settings: ControllerSettings,
        source: S,
        process: P,
        probe: R,
        notifier: N,
        now: Instant,
    ) -> Self {
        Self {
            settings,
            source,
            process,
            probe,
            notifier,
            previous: None,
            last_poll: None,
            nudged: false,
            gate: Gate::Pending { due: now },
            phase: Phase::Idle,
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Forces a snapshot on the next tick regardless of the poll interval.
    pub fn request_snapshot(&mut self) {
        self.nudged = true;
    }

    pub async fn tick(&mut self, now: Instant) {
        self.process.reap();
        self.detect_changes(now).await;

        if let Gate::Pending { due } = self.gate {
            if now < due {
                return;
            }
            self.gate = Gate::Settled;
            self.launch(now).await;
        }

        self.advance_readiness(now).await;
    }

    /// Stops the child.  Called once when the supervisor is shutting down.
    pub async fn shutdown(&mut self) {
        self.process.stop().await;
    }

    fn poll_due(&self, now: Instant) -> bool {
        match self.last_poll {
            None => true,
            Some(last) => self.nudged || now.saturating_duration_since(last) >= self.settings.poll_interval,
        }
    }

    async fn detect_changes(&mut self, now: Instant) {
        if !self.poll_due(now) {
            return;
        }
        let current = self.source.snapshot().await;
        self.last_poll = Some(now);
        self.nudged = false;

        // The first snapshot is the baseline; a dirty tree at startup is not a change.
        let Some(previous) = &self.previous else {
            debug!(paths = current.len(), "Baseline snapshot taken");
            self.previous = Some(current);
            return;
        };
        if *previous == current {
            return;
        }

        info!(paths = ?current.changed_paths(previous), "File changes detected");
        self.previous = Some(current);
        self.gate = Gate::Pending {
            due: now + self.settings.debounce,
        };
        if matches!(self.phase, Phase::WaitingForReady { .. }) {
            self.phase = Phase::Idle;
        }
        // Never leave a stale instance running while a restart is pending.
        self.process.stop().await;
    }

    async fn launch(&mut self, now: Instant) {
        if !self.process.start().await {
            self.phase = Phase::Idle;
            return;
        }
        if self.settings.waits_for_readiness() {
            debug!(port = ?self.settings.port, "Waiting for readiness");
            self.phase = Phase::WaitingForReady { since: now };
        } else {
            self.notifier.notify().await;
            self.phase = Phase::Done;
        }
    }

    async fn advance_readiness(&mut self, now: Instant) {
        let Phase::WaitingForReady { since } = self.phase else {
            return;
        };

        if self.is_ready().await {
            info!("Process is ready");
            self.notifier.notify().await;
            self.phase = Phase::Done;
        } else if now.saturating_duration_since(since) >= self.settings.ready_timeout {
            warn!(
                timeout_secs = self.settings.ready_timeout.as_secs_f64(),
                "Timed out waiting for readiness; skipping notifications"
            );
            self.phase = Phase::Done;
        }
    }

    async fn is_ready(&self) -> bool {
        if self.settings.wait_for_output && !self.process.output_ready() {
            return false;
        }
        match self.settings.port {
            Some(port) => self.probe.is_reachable(port).await,
            None => true,
        }
    }
}
