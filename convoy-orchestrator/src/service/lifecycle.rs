//! Lifecycle Service
//!
//! Decides when the host running the orchestrator is idle enough to go away,
//! without ever terminating it under active use.
//!
//! State machine:
//! - running -> grace_period: no sessions, no incomplete tasks, minimum uptime elapsed
//! - grace_period -> running: session registered/touched or work detected
//! - running/grace_period -> held: explicit hold or active pipeline, until every
//!   hold has expired or been released
//! - any -> shutting_down: explicit request, grace timer, or process signal
//!
//! Every transition is published on a broadcast channel. Timers are tokio
//! tasks tagged with a generation number so a stale timer never acts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use convoy_core::domain::lifecycle::{LifecycleState, LifecycleStatus, Session, ShutdownReason};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Marker file left for the supervising host on rebuild
pub const REBUILD_MARKER: &str = "rebuild-request.json";

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub min_uptime: Duration,
    pub check_interval: Duration,
    pub grace_period: Duration,
    /// Time given to subscribers between the shutdown notice and teardown
    pub reaction_window: Duration,
    /// Hard deadline after teardown starts
    pub force_exit_after: Duration,
    pub state_dir: PathBuf,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            min_uptime: Duration::from_secs(600),
            check_interval: Duration::from_secs(60),
            grace_period: Duration::from_secs(300),
            reaction_window: Duration::from_secs(10),
            force_exit_after: Duration::from_secs(30),
            state_dir: PathBuf::from(".convoy"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    StatusChanged {
        from: LifecycleStatus,
        to: LifecycleStatus,
    },
    SessionRegistered {
        session_id: Uuid,
    },
    SessionUnregistered {
        session_id: Uuid,
    },
    SessionTerminated {
        session_id: Uuid,
    },
    HoldPlaced {
        until: DateTime<Utc>,
        reason: String,
    },
    HoldReleased,
    /// All work is done and the grace period has started
    WorkComplete {
        grace_secs: u64,
    },
    ShuttingDown {
        reason: ShutdownReason,
        reaction_window_secs: u64,
    },
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Not in grace period")]
    NotInGracePeriod,

    #[error("Host is shutting down")]
    ShuttingDown,

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Failed to write lifecycle state: {0}")]
    Io(String),
}

/// Counts incomplete work that should keep the host alive
#[async_trait]
pub trait WorkCounter: Send + Sync {
    async fn incomplete_work(&self) -> anyhow::Result<usize>;
}

/// Called with the exit code once shutdown can no longer wait
pub type ExitHook = Arc<dyn Fn(i32) + Send + Sync>;

struct Hold {
    until: Instant,
    until_wall: DateTime<Utc>,
    reason: String,
}

struct State {
    status: LifecycleStatus,
    started_at: DateTime<Utc>,
    started: Instant,
    last_activity: DateTime<Utc>,
    /// Operator hold
    hold: Option<Hold>,
    /// One hold per active pipeline, independent of the operator hold
    pipeline_holds: HashMap<Uuid, Hold>,
    grace_start: Option<DateTime<Utc>>,
    grace_deadline: Option<Instant>,
    grace_timer: Option<JoinHandle<()>>,
    /// Reason used when the current grace period runs out
    pending_reason: Option<ShutdownReason>,
    generation: u64,
    sessions: HashMap<Uuid, Session>,
    shutdown_reason: Option<ShutdownReason>,
}

struct Inner {
    config: LifecycleConfig,
    state: Mutex<State>,
    work: Arc<dyn WorkCounter>,
    events: broadcast::Sender<LifecycleEvent>,
    accept_closed: watch::Sender<bool>,
    exit: ExitHook,
}

#[derive(Clone)]
pub struct LifecycleController {
    inner: Arc<Inner>,
}

fn wall_after(duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| Utc::now().checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn instant_after(duration: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(duration)
        .unwrap_or_else(|| now + Duration::from_secs(100 * 365 * 24 * 3600))
}

impl LifecycleController {
    pub fn new(config: LifecycleConfig, work: Arc<dyn WorkCounter>, exit: ExitHook) -> Self {
        let now = Utc::now();
        let (events, _) = broadcast::channel(64);
        let (accept_closed, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(State {
                    status: LifecycleStatus::Running,
                    started_at: now,
                    started: Instant::now(),
                    last_activity: now,
                    hold: None,
                    pipeline_holds: HashMap::new(),
                    grace_start: None,
                    grace_deadline: None,
                    grace_timer: None,
                    pending_reason: None,
                    generation: 0,
                    sessions: HashMap::new(),
                    shutdown_reason: None,
                }),
                work,
                events,
                accept_closed,
                exit,
            }),
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events.subscribe()
    }

    /// Flips to `true` once the accept surface should close
    pub fn accept_closed(&self) -> watch::Receiver<bool> {
        self.inner.accept_closed.subscribe()
    }

    pub async fn status(&self) -> LifecycleState {
        let state = self.inner.state.lock().await;
        let now = Instant::now();
        // Report whichever hold lasts longest
        let hold = state
            .hold
            .iter()
            .chain(state.pipeline_holds.values())
            .filter(|h| h.until > now)
            .max_by_key(|h| h.until);

        LifecycleState {
            status: state.status,
            started_at: state.started_at,
            last_activity: state.last_activity,
            hold_until: hold.map(|h| h.until_wall),
            hold_reason: hold.map(|h| h.reason.clone()),
            grace_period_start: state.grace_start,
            grace_remaining_secs: state
                .grace_deadline
                .map(|d| d.saturating_duration_since(now).as_secs()),
            shutdown_reason: state.shutdown_reason.clone(),
            active_sessions: state.sessions.len(),
            uptime_secs: state.started.elapsed().as_secs(),
        }
    }

    pub async fn sessions(&self) -> Vec<Session> {
        let state = self.inner.state.lock().await;
        let mut sessions: Vec<Session> = state.sessions.values().cloned().collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    /// Exit code matching the recorded shutdown reason
    pub async fn exit_code(&self) -> i32 {
        self.inner
            .state
            .lock()
            .await
            .shutdown_reason
            .as_ref()
            .map(|r| r.exit_code())
            .unwrap_or(0)
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    pub async fn register_session(
        &self,
        agent_id: Option<String>,
        task_id: Option<String>,
    ) -> Result<Session, LifecycleError> {
        let mut state = self.inner.state.lock().await;
        if state.status == LifecycleStatus::ShuttingDown {
            return Err(LifecycleError::ShuttingDown);
        }

        let session = Session::new(agent_id, task_id);
        state.sessions.insert(session.id, session.clone());
        state.last_activity = Utc::now();

        if self.cancel_grace(&mut state) {
            info!("Session {} registered, pending shutdown cancelled", session.id);
        } else {
            debug!("Session {} registered", session.id);
        }
        self.emit(LifecycleEvent::SessionRegistered {
            session_id: session.id,
        });

        Ok(session)
    }

    pub async fn touch_session(&self, id: Uuid) -> Result<(), LifecycleError> {
        let mut state = self.inner.state.lock().await;
        let now = Utc::now();
        let session = state
            .sessions
            .get_mut(&id)
            .ok_or(LifecycleError::SessionNotFound(id))?;
        session.last_activity = now;
        state.last_activity = now;

        if self.cancel_grace(&mut state) {
            info!("Session {} active again, pending shutdown cancelled", id);
        }
        Ok(())
    }

    pub async fn unregister_session(&self, id: Uuid) -> bool {
        let mut state = self.inner.state.lock().await;
        if state.sessions.remove(&id).is_none() {
            return false;
        }
        state.last_activity = Utc::now();
        debug!("Session {} unregistered", id);
        self.emit(LifecycleEvent::SessionUnregistered { session_id: id });
        true
    }

    // =========================================================================
    // Holds and grace period
    // =========================================================================

    /// Suspends automatic shutdown for `duration`
    ///
    /// An existing longer hold is kept; the reason is always replaced.
    pub async fn hold(
        &self,
        duration: Duration,
        reason: impl Into<String>,
    ) -> Result<DateTime<Utc>, LifecycleError> {
        let reason = reason.into();
        let mut state = self.inner.state.lock().await;
        if state.status == LifecycleStatus::ShuttingDown {
            return Err(LifecycleError::ShuttingDown);
        }

        let mut hold = Hold {
            until: instant_after(duration),
            until_wall: wall_after(duration),
            reason,
        };
        if let Some(existing) = &state.hold {
            if existing.until > hold.until {
                hold.until = existing.until;
                hold.until_wall = existing.until_wall;
            }
        }
        let until = hold.until_wall;

        info!("Lifecycle held until {} ({})", until, hold.reason);
        self.cancel_grace(&mut state);
        self.emit(LifecycleEvent::HoldPlaced {
            until,
            reason: hold.reason.clone(),
        });
        state.hold = Some(hold);
        self.set_status(&mut state, LifecycleStatus::Held);

        Ok(until)
    }

    /// Lifts the operator hold; returns false if there was none
    ///
    /// Pipeline holds are untouched, so the host stays held while any
    /// pipeline is still active.
    pub async fn release_hold(&self) -> bool {
        {
            let mut state = self.inner.state.lock().await;
            if state.hold.take().is_none() {
                return false;
            }
            info!("Lifecycle hold released");
            self.unhold_if_clear(&mut state);
        }

        self.check_completion().await;
        true
    }

    /// Holds the host for one pipeline until released or `duration` passes
    pub async fn acquire_pipeline_hold(
        &self,
        pipeline_id: Uuid,
        duration: Duration,
    ) -> Result<DateTime<Utc>, LifecycleError> {
        let mut state = self.inner.state.lock().await;
        if state.status == LifecycleStatus::ShuttingDown {
            return Err(LifecycleError::ShuttingDown);
        }

        let hold = Hold {
            until: instant_after(duration),
            until_wall: wall_after(duration),
            reason: format!("pipeline {}", pipeline_id),
        };
        let until = hold.until_wall;

        debug!("Pipeline {} holds lifecycle until {}", pipeline_id, until);
        self.cancel_grace(&mut state);
        self.emit(LifecycleEvent::HoldPlaced {
            until,
            reason: hold.reason.clone(),
        });
        state.pipeline_holds.insert(pipeline_id, hold);
        self.set_status(&mut state, LifecycleStatus::Held);

        Ok(until)
    }

    /// Drops the pipeline's hold; returns false if it held nothing
    pub async fn release_pipeline_hold(&self, pipeline_id: Uuid) -> bool {
        {
            let mut state = self.inner.state.lock().await;
            if state.pipeline_holds.remove(&pipeline_id).is_none() {
                return false;
            }
            debug!("Pipeline {} released its lifecycle hold", pipeline_id);
            if !self.unhold_if_clear(&mut state) {
                return true;
            }
        }

        self.check_completion().await;
        true
    }

    /// Pushes the grace deadline out and returns the new remaining time
    pub async fn extend_grace_period(&self, extra: Duration) -> Result<Duration, LifecycleError> {
        let mut state = self.inner.state.lock().await;
        if state.status != LifecycleStatus::GracePeriod {
            return Err(LifecycleError::NotInGracePeriod);
        }

        let now = Instant::now();
        let deadline = state.grace_deadline.unwrap_or(now) + extra;
        self.schedule_grace_timer(&mut state, deadline);

        let remaining = deadline.saturating_duration_since(now);
        info!("Grace period extended, {}s remaining", remaining.as_secs());
        Ok(remaining)
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Non-forced shutdown: enters the grace period right away, so new
    /// activity can still cancel it
    pub async fn request_shutdown(&self, reason: impl Into<String>) -> Result<(), LifecycleError> {
        let reason = reason.into();
        let mut state = self.inner.state.lock().await;
        match state.status {
            LifecycleStatus::ShuttingDown => Err(LifecycleError::ShuttingDown),
            LifecycleStatus::GracePeriod => {
                state.pending_reason = Some(ShutdownReason::Requested { reason });
                Ok(())
            }
            LifecycleStatus::Running | LifecycleStatus::Held => {
                info!("Shutdown requested: {}", reason);
                state.hold = None;
                state.pipeline_holds.clear();
                self.begin_grace(&mut state);
                state.pending_reason = Some(ShutdownReason::Requested { reason });
                Ok(())
            }
        }
    }

    /// Skips the grace period; returns false if already shutting down
    pub async fn force_shutdown(&self, reason: ShutdownReason) -> bool {
        let mut state = self.inner.state.lock().await;
        self.begin_shutdown(&mut state, reason)
    }

    pub async fn restart(&self, reason: impl Into<String>) -> bool {
        self.force_shutdown(ShutdownReason::Restart {
            reason: reason.into(),
        })
        .await
    }

    /// Leaves a rebuild marker in the state directory, then shuts down
    pub async fn rebuild(
        &self,
        branch: impl Into<String>,
        commit_sha: Option<String>,
        reason: impl Into<String>,
    ) -> Result<bool, LifecycleError> {
        let branch = branch.into();
        let reason = reason.into();

        if self.inner.state.lock().await.status == LifecycleStatus::ShuttingDown {
            return Ok(false);
        }

        let marker = json!({
            "branch": branch,
            "commitSha": commit_sha,
            "reason": reason,
            "requestedAt": Utc::now(),
        });
        let dir = &self.inner.config.state_dir;
        let path = dir.join(REBUILD_MARKER);
        let body = serde_json::to_vec_pretty(&marker).map_err(|e| LifecycleError::Io(e.to_string()))?;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| LifecycleError::Io(e.to_string()))?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| LifecycleError::Io(e.to_string()))?;
        info!("Wrote rebuild marker {}", path.display());

        Ok(self
            .force_shutdown(ShutdownReason::Rebuild {
                branch,
                commit_sha,
                reason,
            })
            .await)
    }

    // =========================================================================
    // Completion check
    // =========================================================================

    /// One evaluation of the state machine
    pub async fn check_completion(&self) -> LifecycleStatus {
        {
            let mut state = self.inner.state.lock().await;
            match state.status {
                LifecycleStatus::ShuttingDown => return LifecycleStatus::ShuttingDown,
                LifecycleStatus::Held => {
                    if !self.unhold_if_clear(&mut state) {
                        return LifecycleStatus::Held;
                    }
                    info!("Lifecycle hold expired");
                }
                _ => {}
            }
        }

        let incomplete = match self.inner.work.incomplete_work().await {
            Ok(count) => count,
            Err(e) => {
                warn!("Failed to read incomplete work, assuming none: {:#}", e);
                0
            }
        };

        let mut state = self.inner.state.lock().await;
        let busy = !state.sessions.is_empty() || incomplete > 0;

        match state.status {
            LifecycleStatus::Running => {
                let uptime = state.started.elapsed();
                if !busy && uptime >= self.inner.config.min_uptime {
                    info!(
                        "No active work after {}s uptime, entering grace period",
                        uptime.as_secs()
                    );
                    self.begin_grace(&mut state);
                } else {
                    debug!(
                        "Lifecycle check: {} sessions, {} incomplete tasks",
                        state.sessions.len(),
                        incomplete
                    );
                }
            }
            LifecycleStatus::GracePeriod if busy => {
                info!("Work detected during grace period, shutdown cancelled");
                self.cancel_grace(&mut state);
            }
            _ => {}
        }

        state.status
    }

    /// Periodic completion checks until shutdown begins
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.inner.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if self.check_completion().await == LifecycleStatus::ShuttingDown {
                debug!("Lifecycle loop finished");
                break;
            }
        }
    }

    // =========================================================================
    // Internals (callers hold the state lock)
    // =========================================================================

    fn emit(&self, event: LifecycleEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    fn set_status(&self, state: &mut State, to: LifecycleStatus) {
        let from = state.status;
        if from == to {
            return;
        }
        state.status = to;
        info!("Lifecycle {} -> {}", from, to);
        self.emit(LifecycleEvent::StatusChanged { from, to });
    }

    /// Drops expired holds and leaves `Held` once none remain
    ///
    /// Returns true if the host is no longer held.
    fn unhold_if_clear(&self, state: &mut State) -> bool {
        let now = Instant::now();
        if state.hold.as_ref().is_some_and(|h| now >= h.until) {
            state.hold = None;
        }
        state.pipeline_holds.retain(|id, h| {
            let live = now < h.until;
            if !live {
                warn!("Pipeline {} hold expired before the pipeline finished", id);
            }
            live
        });

        if state.hold.is_some() || !state.pipeline_holds.is_empty() {
            return false;
        }
        if state.status == LifecycleStatus::Held {
            self.set_status(state, LifecycleStatus::Running);
            self.emit(LifecycleEvent::HoldReleased);
        }
        true
    }

    fn clear_grace(state: &mut State) {
        state.generation += 1;
        if let Some(timer) = state.grace_timer.take() {
            timer.abort();
        }
        state.grace_start = None;
        state.grace_deadline = None;
        state.pending_reason = None;
    }

    /// Returns true if a pending grace period was cancelled
    fn cancel_grace(&self, state: &mut State) -> bool {
        if state.status != LifecycleStatus::GracePeriod {
            return false;
        }
        Self::clear_grace(state);
        self.set_status(state, LifecycleStatus::Running);
        true
    }

    fn begin_grace(&self, state: &mut State) {
        let grace = self.inner.config.grace_period;
        state.grace_start = Some(Utc::now());
        self.schedule_grace_timer(state, instant_after(grace));
        self.set_status(state, LifecycleStatus::GracePeriod);
        self.emit(LifecycleEvent::WorkComplete {
            grace_secs: grace.as_secs(),
        });
    }

    fn schedule_grace_timer(&self, state: &mut State, deadline: Instant) {
        if let Some(timer) = state.grace_timer.take() {
            timer.abort();
        }
        state.generation += 1;
        state.grace_deadline = Some(deadline);

        let generation = state.generation;
        let this = self.clone();
        state.grace_timer = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            this.on_grace_expired(generation).await;
        }));
    }

    async fn on_grace_expired(&self, generation: u64) {
        let mut state = self.inner.state.lock().await;
        if state.generation != generation || state.status != LifecycleStatus::GracePeriod {
            return;
        }
        // This task is the timer; detach instead of aborting it
        state.grace_timer.take();

        if !state.sessions.is_empty() {
            info!(
                "Grace period ended with {} active sessions, staying up",
                state.sessions.len()
            );
            Self::clear_grace(&mut state);
            self.set_status(&mut state, LifecycleStatus::Running);
            return;
        }

        let reason = state.pending_reason.take().unwrap_or(ShutdownReason::Idle);
        self.begin_shutdown(&mut state, reason);
    }

    fn begin_shutdown(&self, state: &mut State, reason: ShutdownReason) -> bool {
        if state.status == LifecycleStatus::ShuttingDown {
            debug!("Already shutting down, ignoring {}", reason);
            return false;
        }

        Self::clear_grace(state);
        state.hold = None;
        state.pipeline_holds.clear();
        state.shutdown_reason = Some(reason.clone());
        self.set_status(state, LifecycleStatus::ShuttingDown);

        let window = self.inner.config.reaction_window;
        warn!("Shutting down ({}), {}s until teardown", reason, window.as_secs());
        self.emit(LifecycleEvent::ShuttingDown {
            reason: reason.clone(),
            reaction_window_secs: window.as_secs(),
        });

        let this = self.clone();
        let code = reason.exit_code();
        tokio::spawn(async move {
            this.execute_shutdown(code).await;
        });
        true
    }

    async fn execute_shutdown(&self, code: i32) {
        tokio::time::sleep(self.inner.config.reaction_window).await;

        let sessions: Vec<Session> = {
            let mut state = self.inner.state.lock().await;
            state.sessions.drain().map(|(_, s)| s).collect()
        };
        for session in sessions {
            info!("Terminating session {}", session.id);
            self.emit(LifecycleEvent::SessionTerminated {
                session_id: session.id,
            });
        }

        info!("Closing accept surface");
        self.inner.accept_closed.send_replace(true);

        let force_after = self.inner.config.force_exit_after;
        let exit = self.inner.exit.clone();
        tokio::spawn(async move {
            tokio::time::sleep(force_after).await;
            warn!("Forcing exit with code {}", code);
            exit(code);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeWork {
        incomplete: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl WorkCounter for FakeWork {
        async fn incomplete_work(&self) -> anyhow::Result<usize> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("snapshot dir unreadable");
            }
            Ok(self.incomplete.load(Ordering::SeqCst))
        }
    }

    struct Harness {
        controller: LifecycleController,
        work: Arc<FakeWork>,
        exited: Arc<AtomicI32>,
    }

    fn harness(min_uptime: Duration) -> Harness {
        harness_in(min_uptime, PathBuf::from(".convoy-test"))
    }

    fn harness_in(min_uptime: Duration, state_dir: PathBuf) -> Harness {
        let work = Arc::new(FakeWork::default());
        let exited = Arc::new(AtomicI32::new(-1));
        let exit_flag = exited.clone();
        let config = LifecycleConfig {
            min_uptime,
            check_interval: Duration::from_secs(60),
            grace_period: Duration::from_secs(300),
            reaction_window: Duration::from_secs(10),
            force_exit_after: Duration::from_secs(30),
            state_dir,
        };
        let controller = LifecycleController::new(
            config,
            work.clone(),
            Arc::new(move |code| exit_flag.store(code, Ordering::SeqCst)),
        );
        Harness {
            controller,
            work,
            exited,
        }
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_host_enters_grace_period() {
        let h = harness(Duration::ZERO);
        let mut events = h.controller.subscribe();

        assert_eq!(
            h.controller.check_completion().await,
            LifecycleStatus::GracePeriod
        );

        let mut saw_work_complete = false;
        while let Ok(event) = events.try_recv() {
            if let LifecycleEvent::WorkComplete { grace_secs } = event {
                assert_eq!(grace_secs, 300);
                saw_work_complete = true;
            }
        }
        assert!(saw_work_complete);

        let status = h.controller.status().await;
        assert_eq!(status.grace_remaining_secs, Some(300));
        assert!(status.grace_period_start.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_minimum_uptime_is_respected() {
        let h = harness(secs(600));
        assert_eq!(h.controller.check_completion().await, LifecycleStatus::Running);

        tokio::time::advance(secs(601)).await;
        assert_eq!(
            h.controller.check_completion().await,
            LifecycleStatus::GracePeriod
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_registration_cancels_grace_period() {
        let h = harness(Duration::ZERO);
        h.controller.check_completion().await;

        let session = h.controller.register_session(None, None).await.unwrap();
        assert_eq!(h.controller.status().await.status, LifecycleStatus::Running);

        // The aborted timer never fires
        tokio::time::sleep(secs(400)).await;
        assert_eq!(h.controller.status().await.status, LifecycleStatus::Running);
        assert_eq!(h.controller.check_completion().await, LifecycleStatus::Running);

        assert!(h.controller.unregister_session(session.id).await);
        assert!(!h.controller.unregister_session(session.id).await);
        assert_eq!(
            h.controller.check_completion().await,
            LifecycleStatus::GracePeriod
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_cancels_grace_and_unknown_session_errors() {
        let h = harness(Duration::ZERO);
        let session = h.controller.register_session(Some("agent-1".into()), None).await.unwrap();

        // Force a grace period even though a session exists
        h.controller.request_shutdown("maintenance").await.unwrap();
        assert_eq!(
            h.controller.status().await.status,
            LifecycleStatus::GracePeriod
        );

        h.controller.touch_session(session.id).await.unwrap();
        assert_eq!(h.controller.status().await.status, LifecycleStatus::Running);

        let missing = Uuid::new_v4();
        assert!(matches!(
            h.controller.touch_session(missing).await,
            Err(LifecycleError::SessionNotFound(id)) if id == missing
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_stays_held_until_expiry() {
        let h = harness(Duration::ZERO);
        h.controller.hold(secs(60), "pipeline").await.unwrap();

        assert_eq!(h.controller.check_completion().await, LifecycleStatus::Held);
        tokio::time::advance(secs(30)).await;
        assert_eq!(h.controller.check_completion().await, LifecycleStatus::Held);

        tokio::time::advance(secs(31)).await;
        assert_eq!(
            h.controller.check_completion().await,
            LifecycleStatus::GracePeriod
        );
        assert!(h.controller.status().await.hold_until.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_keeps_longer_existing_expiry() {
        let h = harness(Duration::ZERO);
        let long = h.controller.hold(secs(3600), "pipeline a").await.unwrap();
        let short = h.controller.hold(secs(60), "pipeline b").await.unwrap();
        assert_eq!(long, short);

        let status = h.controller.status().await;
        assert_eq!(status.hold_reason.as_deref(), Some("pipeline b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_during_grace_cancels_timer() {
        let h = harness(Duration::ZERO);
        h.controller.check_completion().await;
        h.controller.hold(secs(3600), "manual").await.unwrap();

        tokio::time::sleep(secs(400)).await;
        assert_eq!(h.controller.status().await.status, LifecycleStatus::Held);
        assert_eq!(h.exited.load(Ordering::SeqCst), -1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_hold() {
        let h = harness(Duration::ZERO);
        assert!(!h.controller.release_hold().await);

        h.controller.hold(secs(3600), "manual").await.unwrap();
        assert!(h.controller.release_hold().await);
        // The immediate re-check finds an idle host
        assert_eq!(
            h.controller.status().await.status,
            LifecycleStatus::GracePeriod
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pipeline_holds_are_counted_per_pipeline() {
        let h = harness(Duration::ZERO);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        h.controller.acquire_pipeline_hold(a, secs(3600)).await.unwrap();
        h.controller.acquire_pipeline_hold(b, secs(3600)).await.unwrap();

        assert!(h.controller.release_pipeline_hold(a).await);
        assert_eq!(h.controller.status().await.status, LifecycleStatus::Held);
        assert!(!h.controller.release_pipeline_hold(a).await);

        // The operator release leaves pipeline holds alone
        assert!(!h.controller.release_hold().await);
        assert_eq!(h.controller.check_completion().await, LifecycleStatus::Held);

        assert!(h.controller.release_pipeline_hold(b).await);
        assert_eq!(
            h.controller.status().await.status,
            LifecycleStatus::GracePeriod
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_hold_outlives_pipeline_hold() {
        let h = harness(Duration::ZERO);
        let pipeline = Uuid::new_v4();
        h.controller.acquire_pipeline_hold(pipeline, secs(60)).await.unwrap();
        h.controller.hold(secs(7200), "debugging").await.unwrap();

        assert!(h.controller.release_pipeline_hold(pipeline).await);
        let status = h.controller.status().await;
        assert_eq!(status.status, LifecycleStatus::Held);
        assert_eq!(status.hold_reason.as_deref(), Some("debugging"));

        tokio::time::advance(secs(3600)).await;
        assert_eq!(h.controller.check_completion().await, LifecycleStatus::Held);

        assert!(h.controller.release_hold().await);
        assert_eq!(
            h.controller.status().await.status,
            LifecycleStatus::GracePeriod
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pipeline_hold_keeps_host_after_manual_release() {
        let h = harness(Duration::ZERO);
        let pipeline = Uuid::new_v4();
        h.controller.hold(secs(60), "manual").await.unwrap();
        h.controller.acquire_pipeline_hold(pipeline, secs(3600)).await.unwrap();

        assert!(h.controller.release_hold().await);
        let status = h.controller.status().await;
        assert_eq!(status.status, LifecycleStatus::Held);
        assert_eq!(status.hold_reason, Some(format!("pipeline {}", pipeline)));

        // An expired pipeline hold no longer blocks shutdown
        tokio::time::advance(secs(3601)).await;
        assert_eq!(
            h.controller.check_completion().await,
            LifecycleStatus::GracePeriod
        );
        assert!(!h.controller.release_pipeline_hold(pipeline).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pipeline_hold_rejected_while_shutting_down() {
        let h = harness(secs(600));
        h.controller.acquire_pipeline_hold(Uuid::new_v4(), secs(60)).await.unwrap();
        assert!(h.controller.restart("upgrade").await);

        assert!(matches!(
            h.controller.acquire_pipeline_hold(Uuid::new_v4(), secs(60)).await,
            Err(LifecycleError::ShuttingDown)
        ));
        assert!(h.controller.status().await.hold_until.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_outside_grace_period_is_rejected() {
        let h = harness(secs(600));
        let before = h.controller.inner.state.lock().await.generation;

        let err = h.controller.extend_grace_period(secs(120)).await.unwrap_err();
        assert!(matches!(err, LifecycleError::NotInGracePeriod));
        assert_eq!(err.to_string(), "Not in grace period");

        let state = h.controller.inner.state.lock().await;
        assert_eq!(state.generation, before);
        assert!(state.grace_timer.is_none());
        assert_eq!(state.status, LifecycleStatus::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_pushes_deadline() {
        let h = harness(Duration::ZERO);
        h.controller.check_completion().await;

        tokio::time::sleep(secs(200)).await;
        let remaining = h.controller.extend_grace_period(secs(120)).await.unwrap();
        assert_eq!(remaining, secs(220));

        // Past the original deadline
        tokio::time::sleep(secs(150)).await;
        assert_eq!(
            h.controller.status().await.status,
            LifecycleStatus::GracePeriod
        );

        tokio::time::sleep(secs(100)).await;
        assert_eq!(
            h.controller.status().await.status,
            LifecycleStatus::ShuttingDown
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_expiry_shuts_down_and_exits() {
        let h = harness(Duration::ZERO);
        let mut accept_closed = h.controller.accept_closed();
        let mut events = h.controller.subscribe();
        h.controller.check_completion().await;

        tokio::time::sleep(secs(301)).await;
        let status = h.controller.status().await;
        assert_eq!(status.status, LifecycleStatus::ShuttingDown);
        assert_eq!(status.shutdown_reason, Some(ShutdownReason::Idle));
        assert!(!*accept_closed.borrow_and_update());

        tokio::time::sleep(secs(10)).await;
        assert!(*accept_closed.borrow_and_update());
        assert_eq!(h.exited.load(Ordering::SeqCst), -1);

        tokio::time::sleep(secs(30)).await;
        assert_eq!(h.exited.load(Ordering::SeqCst), 0);

        let mut saw_notice = false;
        while let Ok(event) = events.try_recv() {
            if let LifecycleEvent::ShuttingDown {
                reaction_window_secs,
                ..
            } = event
            {
                assert_eq!(reaction_window_secs, 10);
                saw_notice = true;
            }
        }
        assert!(saw_notice);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_shutdown_terminates_sessions() {
        let h = harness(secs(600));
        let mut events = h.controller.subscribe();
        let session = h.controller.register_session(None, None).await.unwrap();

        assert!(
            h.controller
                .force_shutdown(ShutdownReason::Requested {
                    reason: "operator".into()
                })
                .await
        );
        assert!(matches!(
            h.controller.register_session(None, None).await,
            Err(LifecycleError::ShuttingDown)
        ));

        tokio::time::sleep(secs(11)).await;
        assert!(h.controller.sessions().await.is_empty());

        let mut terminated = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let LifecycleEvent::SessionTerminated { session_id } = event {
                terminated.push(session_id);
            }
        }
        assert_eq!(terminated, vec![session.id]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_timer_reverts_when_sessions_appear() {
        let h = harness(Duration::ZERO);
        h.controller.check_completion().await;

        // A session slipping in without cancelling the timer
        {
            let mut state = h.controller.inner.state.lock().await;
            let session = Session::new(None, None);
            state.sessions.insert(session.id, session);
        }

        tokio::time::sleep(secs(301)).await;
        assert_eq!(h.controller.status().await.status, LifecycleStatus::Running);
        assert_eq!(h.exited.load(Ordering::SeqCst), -1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_sessions_block_shutdown() {
        let h = harness(Duration::ZERO);
        h.controller.register_session(None, None).await.unwrap();

        for _ in 0..10 {
            assert_eq!(h.controller.check_completion().await, LifecycleStatus::Running);
            tokio::time::sleep(secs(400)).await;
        }
        assert_eq!(h.exited.load(Ordering::SeqCst), -1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_incomplete_work_cancels_grace() {
        let h = harness(Duration::ZERO);
        assert_eq!(
            h.controller.check_completion().await,
            LifecycleStatus::GracePeriod
        );

        h.work.incomplete.store(2, Ordering::SeqCst);
        assert_eq!(h.controller.check_completion().await, LifecycleStatus::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_work_count_error_counts_as_no_work() {
        let h = harness(Duration::ZERO);
        h.work.incomplete.store(5, Ordering::SeqCst);
        h.work.fail.store(true, Ordering::SeqCst);

        assert_eq!(
            h.controller.check_completion().await,
            LifecycleStatus::GracePeriod
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_shutdown_is_idempotent() {
        let h = harness(secs(600));
        assert!(h.controller.restart("upgrade").await);
        assert!(
            !h.controller
                .force_shutdown(ShutdownReason::Signal {
                    signal: "SIGTERM".into()
                })
                .await
        );
        assert!(h.controller.request_shutdown("again").await.is_err());
        assert_eq!(h.controller.exit_code().await, 75);
        assert_eq!(
            h.controller.check_completion().await,
            LifecycleStatus::ShuttingDown
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_requested_shutdown_uses_its_reason() {
        let h = harness(secs(600));
        h.controller.request_shutdown("maintenance").await.unwrap();

        tokio::time::sleep(secs(301)).await;
        assert_eq!(
            h.controller.status().await.shutdown_reason,
            Some(ShutdownReason::Requested {
                reason: "maintenance".into()
            })
        );
    }

    #[tokio::test]
    async fn test_rebuild_writes_marker() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness_in(secs(600), dir.path().join("state"));

        assert!(
            h.controller
                .rebuild("main", Some("abc123".into()), "deploy")
                .await
                .unwrap()
        );
        assert_eq!(h.controller.exit_code().await, 76);

        let body = std::fs::read(dir.path().join("state").join(REBUILD_MARKER)).unwrap();
        let marker: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(marker["branch"], "main");
        assert_eq!(marker["commitSha"], "abc123");

        assert!(!h.controller.rebuild("main", None, "again").await.unwrap());
    }
}
