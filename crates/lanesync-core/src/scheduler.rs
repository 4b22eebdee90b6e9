//! Poll scheduler: fetch, record, publish, wait, repeat until stopped.
//!
//! A single spawned task owns the loop. Callers hold a [`PollHandle`] and only
//! *request* transitions: pause/resume and interval changes are written to a
//! `watch` channel that the loop samples at the start of each tick (running
//! flag) and at the start of each wait (interval). The wait is
//! completion-relative, so fetches never overlap.
//!
//! `stop()` marks the engine stopped under the same lock that guards history
//! and publication, then cancels the loop's token. A fetch still in flight is
//! dropped by the loop's `select!`, and even a result that raced past the
//! cancellation is rejected by the stopped check, so nothing is published
//! once `stop()` has returned.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Result, bail};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::credential::CredentialSource;
use crate::fetcher::{Failure, SnapshotSource};
use crate::history::{HistorySnapshot, HistoryWindow};
use crate::publisher::{PublishedState, StatePublisher};
use crate::snapshot::Snapshot;

/// Lifecycle of a poll engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    /// Constructed but not started.
    Idle,
    /// Loop active and fetching on every tick.
    Polling,
    /// Loop active and ticking, but skipping fetches.
    Paused,
    /// Terminal; no further fetches or publications.
    Stopped,
}

/// Cadence and running flag requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    interval: Duration,
    running: bool,
}

impl PollConfig {
    /// # Errors
    /// Returns an error if `interval` is zero.
    pub fn new(interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            bail!("poll interval must be positive");
        }
        Ok(Self {
            interval,
            running: true,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn running(&self) -> bool {
        self.running
    }
}

/// State the loop mutates; guarded together so stop is atomic with publish.
#[derive(Debug)]
struct LoopState {
    history: HistoryWindow,
    phase: PollPhase,
}

#[derive(Debug)]
struct Engine {
    state: Mutex<LoopState>,
    publisher: StatePublisher,
}

impl Engine {
    fn new() -> Self {
        Self {
            state: Mutex::new(LoopState {
                history: HistoryWindow::new(),
                phase: PollPhase::Polling,
            }),
            publisher: StatePublisher::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a poll outcome. Returns `false` (and changes nothing) once stopped.
    fn apply(&self, result: Result<Snapshot, Failure>) -> bool {
        let mut state = self.lock();
        if state.phase == PollPhase::Stopped {
            return false;
        }
        let published = match result {
            Ok(snapshot) => {
                state.history.record(snapshot.counts());
                PublishedState::Live {
                    history: state.history.snapshot(),
                    snapshot,
                }
            }
            Err(failure) => failure.into(),
        };
        self.publisher.publish(published);
        true
    }

    /// Moves to a non-terminal phase. Returns `false` once stopped.
    fn enter(&self, phase: PollPhase) -> bool {
        let mut state = self.lock();
        if state.phase == PollPhase::Stopped {
            return false;
        }
        state.phase = phase;
        true
    }

    /// Marks the engine stopped. Returns `true` on the first call only.
    fn close(&self) -> bool {
        let mut state = self.lock();
        let was_open = state.phase != PollPhase::Stopped;
        state.phase = PollPhase::Stopped;
        was_open
    }

    fn phase(&self) -> PollPhase {
        self.lock().phase
    }

    fn history(&self) -> HistorySnapshot {
        self.lock().history.snapshot()
    }
}

/// A configured engine that has not started polling yet.
pub struct Poller<S, C> {
    source: S,
    credentials: C,
    config: PollConfig,
}

impl<S, C> Poller<S, C>
where
    S: SnapshotSource,
    C: CredentialSource,
{
    /// # Errors
    /// Returns an error if `interval` is zero.
    pub fn new(source: S, credentials: C, interval: Duration) -> Result<Self> {
        Ok(Self {
            source,
            credentials,
            config: PollConfig::new(interval)?,
        })
    }

    pub fn phase(&self) -> PollPhase {
        PollPhase::Idle
    }

    /// Spawns the loop on the current tokio runtime. The first fetch is issued
    /// immediately, without an initial wait.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    pub fn start(self) -> PollHandle {
        let (config_tx, config_rx) = watch::channel(self.config);
        let engine = Arc::new(Engine::new());
        let cancel = CancellationToken::new();

        tracing::info!(
            interval_ms = self.config.interval.as_millis() as u64,
            "starting poll loop"
        );
        let task = tokio::spawn(run_loop(
            self.source,
            self.credentials,
            config_rx,
            Arc::clone(&engine),
            cancel.clone(),
        ));

        PollHandle {
            config: config_tx,
            engine,
            cancel,
            task: Some(task),
        }
    }
}

async fn run_loop<S, C>(
    source: S,
    credentials: C,
    mut config: watch::Receiver<PollConfig>,
    engine: Arc<Engine>,
    cancel: CancellationToken,
) where
    S: SnapshotSource,
    C: CredentialSource,
{
    // The first fetch is owed even if a pause landed before the task ran.
    let mut first_tick = true;
    loop {
        let forced = std::mem::take(&mut first_tick);
        let running = config.borrow_and_update().running || forced;
        let phase = if running {
            PollPhase::Polling
        } else {
            PollPhase::Paused
        };
        if !engine.enter(phase) {
            break;
        }

        if running {
            let credential = credentials.credential();
            tracing::debug!(authenticated = credential.is_some(), "fetching status");
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = source.fetch(credential.as_deref()) => result,
            };
            match &result {
                Ok(snapshot) => tracing::debug!(counts = ?snapshot.counts(), "status received"),
                Err(failure) => {
                    tracing::warn!(kind = %failure.kind, detail = %failure.detail, "status poll failed");
                }
            }
            if !engine.apply(result) {
                break;
            }
        } else {
            tracing::trace!("paused; skipping fetch");
        }

        let interval = config.borrow().interval;
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
    }
    tracing::debug!("poll loop exited");
}

/// Control surface of a running engine. Dropping the handle stops the engine.
#[derive(Debug)]
pub struct PollHandle {
    config: watch::Sender<PollConfig>,
    engine: Arc<Engine>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PollHandle {
    /// Requests that subsequent ticks skip fetching.
    pub fn pause(&self) {
        if self.is_stopped() {
            return;
        }
        if self.config.send_if_modified(|c| std::mem::replace(&mut c.running, false)) {
            tracing::info!("polling paused");
        }
    }

    /// Requests that the next tick fetch again.
    pub fn resume(&self) {
        if self.is_stopped() {
            return;
        }
        if self.config.send_if_modified(|c| !std::mem::replace(&mut c.running, true)) {
            tracing::info!("polling resumed");
        }
    }

    /// Changes the cadence starting with the next scheduled wait. A wait that
    /// is already pending keeps its original length.
    ///
    /// # Errors
    /// Returns an error if `interval` is zero or the engine is stopped.
    pub fn set_interval(&self, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            bail!("poll interval must be positive");
        }
        if self.is_stopped() {
            bail!("poll engine is stopped");
        }
        self.config.send_modify(|c| c.interval = interval);
        tracing::info!(interval_ms = interval.as_millis() as u64, "poll interval changed");
        Ok(())
    }

    /// Stops the engine. Idempotent. After this returns no fetch is issued and
    /// neither history nor the published state changes again.
    pub fn stop(&self) {
        if self.engine.close() {
            tracing::info!("poll loop stopped");
        }
        self.cancel.cancel();
    }

    /// Stops the engine and waits for the loop task to exit.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take()
            && let Err(err) = task.await
            && err.is_panic()
        {
            tracing::error!("poll loop panicked: {err}");
        }
    }

    /// Phase the loop is currently in. Pause/resume requests show up here once
    /// the loop reaches its next tick; `stop()` shows up immediately.
    pub fn phase(&self) -> PollPhase {
        self.engine.phase()
    }

    pub fn is_stopped(&self) -> bool {
        self.phase() == PollPhase::Stopped
    }

    /// Most recently requested configuration.
    pub fn config(&self) -> PollConfig {
        *self.config.borrow()
    }

    pub fn current(&self) -> Option<PublishedState> {
        self.engine.publisher.current()
    }

    pub fn history(&self) -> HistorySnapshot {
        self.engine.history()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<PublishedState>> {
        self.engine.publisher.subscribe()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
