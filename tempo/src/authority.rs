//! The single owner of timer ground truth
//!
//! Every client command and every tick goes through one queue and is handled
//! to completion before the next one, so nothing ever observes a half-applied
//! transition. Tick loops are separate tasks that only post `Tick` messages;
//! each carries the generation of the loop that sent it, and a tick from a
//! released loop is dropped on arrival.

use crate::effects::{ExitReason, FocusPolicy, SideEffectChannel};
use crate::persistence::SnapshotStore;
use crate::timer::{Countdown, Tick};
use chrono::Local;
use std::time::Duration;
use tempo_ipc::{Command, Response, StoredSnapshot, TimerSnapshot, TimerState, TimerStatus};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

const QUEUE_CAPACITY: usize = 64;

#[derive(Error, Debug)]
pub enum AuthorityError {
    #[error("timer authority has shut down")]
    Closed,

    #[error("unexpected reply from authority: {0:?}")]
    UnexpectedReply(Response),
}

#[derive(Debug, Clone, Default)]
pub struct AuthorityOptions {
    pub policy: FocusPolicy,
    /// Re-arm a countdown that was running when the last process died
    pub resume_on_restart: bool,
}

enum Message {
    Command {
        command: Command,
        reply: oneshot::Sender<Response>,
    },
    Tick {
        generation: u64,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// The only way to reach the authority. Cheap to clone.
#[derive(Clone)]
pub struct AuthorityHandle {
    tx: mpsc::Sender<Message>,
}

impl AuthorityHandle {
    pub async fn dispatch(&self, command: Command) -> Result<Response, AuthorityError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Message::Command { command, reply })
            .await
            .map_err(|_| AuthorityError::Closed)?;
        rx.await.map_err(|_| AuthorityError::Closed)
    }

    pub async fn start(
        &self,
        duration_seconds: u64,
        subject_id: impl Into<String>,
    ) -> Result<bool, AuthorityError> {
        self.accepted(Command::Start {
            duration_seconds,
            subject_id: subject_id.into(),
        })
        .await
    }

    pub async fn stop(&self) -> Result<bool, AuthorityError> {
        self.accepted(Command::Stop).await
    }

    pub async fn reset(&self, default_duration_seconds: u64) -> Result<bool, AuthorityError> {
        self.accepted(Command::Reset {
            default_duration_seconds,
        })
        .await
    }

    pub async fn retarget(&self, subject_id: impl Into<String>) -> Result<bool, AuthorityError> {
        self.accepted(Command::Retarget {
            subject_id: subject_id.into(),
        })
        .await
    }

    pub async fn query(&self) -> Result<TimerStatus, AuthorityError> {
        match self.dispatch(Command::Query).await? {
            Response::Status(status) => Ok(status),
            other => Err(AuthorityError::UnexpectedReply(other)),
        }
    }

    pub async fn snapshot(&self) -> Result<Option<StoredSnapshot>, AuthorityError> {
        match self.dispatch(Command::Snapshot).await? {
            Response::Snapshot(stored) => Ok(stored),
            other => Err(AuthorityError::UnexpectedReply(other)),
        }
    }

    pub async fn focus_status(&self) -> Result<bool, AuthorityError> {
        match self.dispatch(Command::FocusStatus).await? {
            Response::Focus(active) => Ok(active),
            other => Err(AuthorityError::UnexpectedReply(other)),
        }
    }

    /// Persist the current state and stop the authority.
    pub async fn shutdown(&self) -> Result<(), AuthorityError> {
        let (done, rx) = oneshot::channel();
        self.tx
            .send(Message::Shutdown { done })
            .await
            .map_err(|_| AuthorityError::Closed)?;
        rx.await.map_err(|_| AuthorityError::Closed)
    }

    async fn accepted(&self, command: Command) -> Result<bool, AuthorityError> {
        match self.dispatch(command).await? {
            Response::Accepted(accepted) => Ok(accepted),
            other => Err(AuthorityError::UnexpectedReply(other)),
        }
    }
}

/// Ownership token of a tick loop. Dropping it stops the loop.
struct TickHandle {
    generation: u64,
    task: JoinHandle<()>,
}

impl Drop for TickHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct ActiveTimer {
    subject_id: String,
    countdown: Countdown,
    /// Present exactly while the countdown is running
    tick: Option<TickHandle>,
}

pub struct Authority<S, E> {
    active: Option<ActiveTimer>,
    /// What a query reports when there is no active timer
    idle: TimerSnapshot,
    idle_state: TimerState,
    focus_engaged: bool,
    /// Last record handed to the store
    durable: Option<StoredSnapshot>,
    generation: u64,
    queue: mpsc::WeakSender<Message>,
    store: S,
    effects: E,
    options: AuthorityOptions,
}

impl<S: SnapshotStore, E: SideEffectChannel> Authority<S, E> {
    /// Start the authority task.
    ///
    /// `recovered` is the last durable snapshot from a previous process. The
    /// task runs until `AuthorityHandle::shutdown` or until every handle and
    /// tick loop is gone; either way it persists the final state.
    pub fn spawn(
        options: AuthorityOptions,
        store: S,
        effects: E,
        recovered: Option<StoredSnapshot>,
    ) -> (AuthorityHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let authority = Self {
            active: None,
            idle: TimerSnapshot::default(),
            idle_state: TimerState::Idle,
            focus_engaged: false,
            durable: None,
            generation: 0,
            queue: tx.downgrade(),
            store,
            effects,
            options,
        };
        let task = tokio::spawn(authority.run(rx, recovered));
        (AuthorityHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Message>, recovered: Option<StoredSnapshot>) {
        if let Some(saved) = recovered {
            self.recover(saved);
        }

        while let Some(message) = rx.recv().await {
            match message {
                Message::Command { command, reply } => {
                    let response = self.handle(command);
                    let _ = reply.send(response);
                }
                Message::Tick { generation } => self.tick(generation),
                Message::Shutdown { done } => {
                    self.teardown();
                    let _ = done.send(());
                    return;
                }
            }
        }
        self.teardown();
    }

    fn handle(&mut self, command: Command) -> Response {
        match command {
            Command::Start {
                duration_seconds,
                subject_id,
            } => Response::Accepted(self.start(duration_seconds, subject_id)),
            Command::Stop => Response::Accepted(self.stop()),
            Command::Reset {
                default_duration_seconds,
            } => Response::Accepted(self.reset(default_duration_seconds)),
            Command::Query => Response::Status(self.query()),
            Command::Snapshot => Response::Snapshot(self.durable.clone()),
            Command::FocusStatus => Response::Focus(self.focus_engaged),
            Command::Retarget { subject_id } => Response::Accepted(self.retarget(subject_id)),
        }
    }

    /// Resume a timer with time left, otherwise start a fresh one.
    fn start(&mut self, duration_seconds: u64, subject_id: String) -> bool {
        let resumable = self
            .active
            .as_ref()
            .is_some_and(|timer| timer.countdown.is_resumable());

        if resumable {
            let Some(timer) = self.active.as_mut() else {
                return false;
            };
            if timer.subject_id != subject_id {
                info!(from = %timer.subject_id, to = %subject_id, "Retargeting timer");
                let previous = std::mem::replace(&mut timer.subject_id, subject_id.clone());
                if self.focus_engaged && !self.options.policy.engages(&subject_id) {
                    self.focus_engaged = false;
                    self.effects.notify_exit(&previous, ExitReason::Stopped);
                }
            }
            if let Some(timer) = self.active.as_ref().filter(|timer| timer.tick.is_none()) {
                info!(remaining = timer.countdown.remaining(), "Resuming timer");
                if !self.arm() {
                    return false;
                }
            }
        } else {
            if duration_seconds == 0 {
                warn!("Refusing to start an empty timer");
                if let Some(timer) = self.release() {
                    self.effects.notify_exit(&timer.subject_id, ExitReason::Reset);
                }
                self.focus_engaged = false;
                self.idle = TimerSnapshot::idle(0);
                self.idle_state = TimerState::Idle;
                self.persist();
                return false;
            }
            self.release();
            info!(duration_seconds, subject_id = %subject_id, "Starting timer");
            self.active = Some(ActiveTimer {
                subject_id: subject_id.clone(),
                countdown: Countdown::new(duration_seconds),
                tick: None,
            });
            if !self.arm() {
                self.active = None;
                return false;
            }
        }

        if self.options.policy.engages(&subject_id) {
            self.focus_engaged = true;
            self.effects.notify_enter(&subject_id);
        }
        self.persist();
        true
    }

    /// Pause. The remaining time is kept for a later start.
    fn stop(&mut self) -> bool {
        let Some(timer) = self.active.as_mut() else {
            debug!("Stop with no active timer");
            return true;
        };
        timer.tick = None;
        if !timer.countdown.pause() {
            debug!("Timer already paused");
            return true;
        }

        info!(remaining = timer.countdown.remaining(), "Timer paused");
        let subject_id = timer.subject_id.clone();
        self.focus_engaged = false;
        self.effects.notify_exit(&subject_id, ExitReason::Stopped);
        self.persist();
        true
    }

    fn reset(&mut self, default_duration_seconds: u64) -> bool {
        if let Some(timer) = self.release() {
            info!(subject_id = %timer.subject_id, "Timer reset");
            self.effects.notify_exit(&timer.subject_id, ExitReason::Reset);
        }
        self.focus_engaged = false;
        self.idle = TimerSnapshot::idle(default_duration_seconds);
        self.idle_state = TimerState::Idle;
        self.persist();
        true
    }

    /// The subject was reloaded or replaced; point the timer at the new one.
    fn retarget(&mut self, subject_id: String) -> bool {
        let Some(timer) = self
            .active
            .as_mut()
            .filter(|timer| timer.countdown.is_resumable())
        else {
            debug!(subject_id = %subject_id, "Retarget with no active timer");
            return false;
        };

        debug!(from = %timer.subject_id, to = %subject_id, "Subject replaced");
        timer.subject_id = subject_id.clone();
        if self.focus_engaged && self.options.policy.engages(&subject_id) {
            self.effects.notify_enter(&subject_id);
        }
        self.persist();
        true
    }

    fn query(&self) -> TimerStatus {
        match &self.active {
            Some(timer) => TimerStatus {
                snapshot: timer.countdown.snapshot(),
                state: if timer.countdown.is_running() {
                    TimerState::Running
                } else {
                    TimerState::Paused
                },
                subject_id: Some(timer.subject_id.clone()),
            },
            None => TimerStatus {
                snapshot: self.idle,
                state: self.idle_state,
                subject_id: None,
            },
        }
    }

    fn tick(&mut self, generation: u64) {
        let Some(timer) = self.active.as_mut() else {
            debug!(generation, "Tick with no active timer ignored");
            return;
        };
        if timer.tick.as_ref().map(|tick| tick.generation) != Some(generation) {
            debug!(generation, "Stale tick ignored");
            return;
        }

        match timer.countdown.tick() {
            Tick::Continue => debug!(remaining = timer.countdown.remaining(), "Tick"),
            Tick::Completed => self.complete(),
        }
        self.persist();
    }

    /// Tear down a countdown that reached zero. Runs inside the tick that
    /// hit zero, so no query can see zero without the exit already sent.
    fn complete(&mut self) {
        let Some(timer) = self.release() else {
            return;
        };

        info!(subject_id = %timer.subject_id, "Timer completed");
        self.idle = timer.countdown.snapshot();
        self.idle_state = TimerState::Completed;
        self.focus_engaged = false;
        self.effects
            .notify_exit(&timer.subject_id, ExitReason::Completed);
    }

    fn recover(&mut self, saved: StoredSnapshot) {
        let remaining = saved.timer_state.remaining_seconds;
        let was_running = saved.timer_state.running;

        match saved.subject_id.clone() {
            Some(subject_id) if remaining > 0 => {
                info!(remaining, subject_id = %subject_id, was_running, "Recovered timer from snapshot");
                self.active = Some(ActiveTimer {
                    subject_id: subject_id.clone(),
                    countdown: Countdown::restore(saved.timer_state),
                    tick: None,
                });

                if was_running && self.options.resume_on_restart && self.arm() {
                    info!("Resuming recovered timer");
                    if self.options.policy.engages(&subject_id) {
                        self.focus_engaged = true;
                        self.effects.notify_enter(&subject_id);
                    }
                } else if saved.focus_mode {
                    self.effects
                        .notify_exit(&subject_id, ExitReason::Interrupted);
                }
            }
            _ => {
                self.idle = TimerSnapshot {
                    running: false,
                    ..saved.timer_state
                };
                self.idle_state = if self.idle.remaining_seconds == 0
                    && self.idle.total_duration_seconds > 0
                {
                    TimerState::Completed
                } else {
                    TimerState::Idle
                };
            }
        }
        self.persist();
    }

    fn teardown(&mut self) {
        // The running flag stays as it was, so the next process knows the
        // countdown was live.
        if let Some(timer) = self.active.as_mut() {
            timer.tick = None;
        }
        self.persist();
        info!("Timer authority stopped");
    }

    /// Start a tick loop for the active timer, replacing any previous one.
    fn arm(&mut self) -> bool {
        let Some(queue) = self.queue.upgrade() else {
            warn!("Authority queue is closed, cannot start ticking");
            return false;
        };
        let Some(timer) = self.active.as_mut() else {
            return false;
        };

        // The old loop is gone before the new one exists.
        timer.tick = None;
        self.generation += 1;
        timer.countdown.resume();
        timer.tick = Some(TickHandle {
            generation: self.generation,
            task: spawn_tick_loop(queue, self.generation),
        });
        true
    }

    /// Take the active timer out, stopping its tick loop.
    fn release(&mut self) -> Option<ActiveTimer> {
        let mut timer = self.active.take()?;
        timer.tick = None;
        Some(timer)
    }

    fn persist(&mut self) {
        let (timer_state, subject_id) = match &self.active {
            Some(timer) => (timer.countdown.snapshot(), Some(timer.subject_id.clone())),
            None => (self.idle, None),
        };
        let record = StoredSnapshot {
            timer_state,
            focus_mode: self.focus_engaged,
            subject_id,
            saved_at: Local::now(),
        };
        self.durable = Some(record.clone());
        self.store.save(record);
    }
}

fn spawn_tick_loop(queue: mpsc::Sender<Message>, generation: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval_at(Instant::now() + TICK_INTERVAL, TICK_INTERVAL);
        // Replay missed ticks so a stalled runtime catches up.
        interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
        loop {
            interval.tick().await;
            if queue.send(Message::Tick { generation }).await.is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::{EffectBus, SideEffect};
    use crate::persistence::MemoryStore;
    use tokio::sync::broadcast;

    const YOUTUBE: &str = "https://www.youtube.com/watch?v=focus";

    struct Harness {
        handle: AuthorityHandle,
        store: MemoryStore,
        effects: broadcast::Receiver<SideEffect>,
    }

    impl Harness {
        fn spawn() -> Self {
            Self::spawn_with(false, None)
        }

        fn spawn_with(resume_on_restart: bool, recovered: Option<StoredSnapshot>) -> Self {
            let store = MemoryStore::default();
            let bus = EffectBus::new(64);
            let effects = bus.subscribe();
            let options = AuthorityOptions {
                policy: FocusPolicy::new(vec!["youtube.com".into()]),
                resume_on_restart,
            };
            let (handle, _task) = Authority::spawn(options, store.clone(), bus, recovered);
            Self {
                handle,
                store,
                effects,
            }
        }

        fn drain_effects(&mut self) -> Vec<SideEffect> {
            let mut seen = Vec::new();
            while let Ok(effect) = self.effects.try_recv() {
                seen.push(effect);
            }
            seen
        }
    }

    fn exit(subject_id: &str, reason: ExitReason) -> SideEffect {
        SideEffect::Exit {
            subject_id: subject_id.into(),
            reason,
        }
    }

    fn enter(subject_id: &str) -> SideEffect {
        SideEffect::Enter {
            subject_id: subject_id.into(),
        }
    }

    async fn after_ticks(ticks: u32) {
        time::sleep(TICK_INTERVAL * ticks + TICK_INTERVAL / 2).await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_reports_the_full_duration() {
        let h = Harness::spawn();

        assert!(h.handle.start(10, "tab-1").await.unwrap());
        let status = h.handle.query().await.unwrap();

        assert!(status.running());
        assert_eq!(status.remaining_seconds(), 10);
        assert_eq!(status.snapshot.total_duration_seconds, 10);
        assert_eq!(status.state, TimerState::Running);
        assert_eq!(status.subject_id.as_deref(), Some("tab-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_start_is_rejected() {
        let h = Harness::spawn();

        assert!(!h.handle.start(0, "tab-1").await.unwrap());
        let status = h.handle.query().await.unwrap();
        assert!(!status.running());
        assert_eq!(status.remaining_seconds(), 0);
        assert_eq!(status.state, TimerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_start_after_reset_reports_zero() {
        let mut h = Harness::spawn();
        h.handle.reset(20).await.unwrap();

        assert!(!h.handle.start(0, "tab-1").await.unwrap());
        let status = h.handle.query().await.unwrap();
        assert!(!status.running());
        assert_eq!(status.remaining_seconds(), 0);
        assert_eq!(status.snapshot.total_duration_seconds, 0);
        assert_eq!(h.store.last().unwrap().timer_state, TimerSnapshot::idle(0));

        after_ticks(2).await;
        assert_eq!(h.handle.query().await.unwrap().remaining_seconds(), 0);
        assert!(h.drain_effects().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_counts_down_and_completes_once() {
        let mut h = Harness::spawn();
        h.handle.start(3, "A").await.unwrap();

        time::sleep(Duration::from_millis(1500)).await;
        let status = h.handle.query().await.unwrap();
        assert!(status.running());
        assert_eq!(status.remaining_seconds(), 2);

        time::sleep(Duration::from_millis(2000)).await;
        let status = h.handle.query().await.unwrap();
        assert!(!status.running());
        assert_eq!(status.remaining_seconds(), 0);
        assert_eq!(status.state, TimerState::Completed);

        assert_eq!(h.drain_effects(), vec![exit("A", ExitReason::Completed)]);
    }

    #[tokio::test(start_paused = true)]
    async fn completion_fires_once_and_nothing_ticks_after() {
        let mut h = Harness::spawn();
        h.handle.start(2, YOUTUBE).await.unwrap();

        after_ticks(4).await;
        let writes = h.store.records().len();
        after_ticks(3).await;

        assert_eq!(h.store.records().len(), writes);
        assert_eq!(
            h.drain_effects(),
            vec![enter(YOUTUBE), exit(YOUTUBE, ExitReason::Completed)]
        );

        let last = h.store.last().unwrap();
        assert_eq!(last.timer_state.remaining_seconds, 0);
        assert!(!last.timer_state.running);
        assert!(!last.focus_mode);
        assert_eq!(last.subject_id, None);
    }

    #[tokio::test(start_paused = true)]
    async fn every_tick_is_persisted() {
        let h = Harness::spawn();
        h.handle.start(5, "tab-1").await.unwrap();
        after_ticks(2).await;

        let remaining: Vec<u64> = h
            .store
            .records()
            .iter()
            .map(|record| record.timer_state.remaining_seconds)
            .collect();
        assert_eq!(remaining, vec![5, 4, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let mut h = Harness::spawn();
        h.handle.start(10, "tab-1").await.unwrap();
        after_ticks(2).await;

        assert!(h.handle.stop().await.unwrap());
        let first = h.handle.query().await.unwrap();
        let writes = h.store.records().len();

        assert!(h.handle.stop().await.unwrap());
        let second = h.handle.query().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.state, TimerState::Paused);
        assert_eq!(first.remaining_seconds(), 8);
        assert_eq!(h.store.records().len(), writes);
        assert_eq!(h.drain_effects(), vec![exit("tab-1", ExitReason::Stopped)]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_without_a_timer_is_a_no_op() {
        let mut h = Harness::spawn();

        assert!(h.handle.stop().await.unwrap());
        assert!(h.store.records().is_empty());
        assert!(h.drain_effects().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn start_after_stop_resumes_and_ignores_duration() {
        let h = Harness::spawn();
        h.handle.start(10, "tab-1").await.unwrap();
        after_ticks(3).await;
        h.handle.stop().await.unwrap();

        assert!(h.handle.start(999, "tab-1").await.unwrap());
        let status = h.handle.query().await.unwrap();
        assert!(status.running());
        assert_eq!(status.remaining_seconds(), 7);
        assert_eq!(status.snapshot.total_duration_seconds, 10);

        time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(h.handle.query().await.unwrap().remaining_seconds(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_while_running_keeps_a_single_loop() {
        let h = Harness::spawn();
        h.handle.start(10, "A").await.unwrap();
        after_ticks(2).await;

        assert!(h.handle.start(10, "B").await.unwrap());
        let status = h.handle.query().await.unwrap();
        assert_eq!(status.remaining_seconds(), 8);
        assert_eq!(status.subject_id.as_deref(), Some("B"));

        time::sleep(TICK_INTERVAL).await;
        assert_eq!(h.handle.query().await.unwrap().remaining_seconds(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_reinitializes_to_the_default() {
        let mut h = Harness::spawn();
        h.handle.start(10, "tab-1").await.unwrap();
        after_ticks(3).await;

        assert!(h.handle.reset(20).await.unwrap());
        let status = h.handle.query().await.unwrap();
        assert!(!status.running());
        assert_eq!(status.remaining_seconds(), 20);
        assert_eq!(status.snapshot.total_duration_seconds, 20);
        assert_eq!(status.state, TimerState::Idle);

        after_ticks(2).await;
        assert_eq!(h.handle.query().await.unwrap().remaining_seconds(), 20);
        assert_eq!(h.drain_effects(), vec![exit("tab-1", ExitReason::Reset)]);

        // A reset timer is gone: start begins a fresh countdown.
        h.handle.start(30, "tab-1").await.unwrap();
        assert_eq!(h.handle.query().await.unwrap().remaining_seconds(), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_ticks_cannot_touch_a_newer_loop() {
        let h = Harness::spawn();
        h.handle.start(10, "tab-1").await.unwrap();
        h.handle.stop().await.unwrap();
        h.handle.start(10, "tab-1").await.unwrap();

        // Generation 1 belonged to the loop released by stop.
        h.handle
            .tx
            .send(Message::Tick { generation: 1 })
            .await
            .unwrap();
        assert_eq!(h.handle.query().await.unwrap().remaining_seconds(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn queries_never_run_backwards() {
        let h = Harness::spawn();
        h.handle.start(5, "tab-1").await.unwrap();

        let mut previous = h.handle.query().await.unwrap().remaining_seconds();
        for _ in 0..70 {
            time::sleep(Duration::from_millis(100)).await;
            let status = h.handle.query().await.unwrap();
            assert!(status.remaining_seconds() <= previous);
            assert!(!status.running() || status.remaining_seconds() > 0);
            previous = status.remaining_seconds();
        }
        assert_eq!(previous, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn focus_follows_the_policy() {
        let mut h = Harness::spawn();

        h.handle.start(10, "https://docs.rs").await.unwrap();
        assert!(!h.handle.focus_status().await.unwrap());
        h.handle.reset(10).await.unwrap();
        h.drain_effects();

        h.handle.start(10, YOUTUBE).await.unwrap();
        assert!(h.handle.focus_status().await.unwrap());
        assert!(h.store.last().unwrap().focus_mode);

        h.handle.stop().await.unwrap();
        assert!(!h.handle.focus_status().await.unwrap());
        assert_eq!(
            h.drain_effects(),
            vec![enter(YOUTUBE), exit(YOUTUBE, ExitReason::Stopped)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retarget_moves_focus_to_the_new_subject() {
        let mut h = Harness::spawn();
        assert!(!h.handle.retarget(YOUTUBE).await.unwrap());

        h.handle.start(10, YOUTUBE).await.unwrap();
        let reloaded = "https://www.youtube.com/watch?v=again";
        assert!(h.handle.retarget(reloaded).await.unwrap());

        let status = h.handle.query().await.unwrap();
        assert_eq!(status.subject_id.as_deref(), Some(reloaded));
        assert_eq!(h.drain_effects(), vec![enter(YOUTUBE), enter(reloaded)]);
    }

    #[tokio::test(start_paused = true)]
    async fn moving_focus_to_an_unmatched_subject_exits_focus() {
        let mut h = Harness::spawn();
        h.handle.start(10, YOUTUBE).await.unwrap();
        assert!(h.handle.focus_status().await.unwrap());

        assert!(h.handle.start(10, "https://docs.rs").await.unwrap());
        assert!(!h.handle.focus_status().await.unwrap());
        assert!(!h.store.last().unwrap().focus_mode);
        assert!(h.handle.query().await.unwrap().running());
        assert_eq!(
            h.drain_effects(),
            vec![enter(YOUTUBE), exit(YOUTUBE, ExitReason::Stopped)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_reports_the_last_write() {
        let h = Harness::spawn();
        assert_eq!(h.handle.snapshot().await.unwrap(), None);

        h.handle.start(10, "tab-1").await.unwrap();
        after_ticks(1).await;
        h.handle.stop().await.unwrap();

        let stored = h.handle.snapshot().await.unwrap().unwrap();
        assert_eq!(Some(stored), h.store.last());
    }

    fn saved(remaining: u64, running: bool, focus_mode: bool) -> StoredSnapshot {
        StoredSnapshot {
            timer_state: TimerSnapshot {
                remaining_seconds: remaining,
                total_duration_seconds: 60,
                running,
            },
            focus_mode,
            subject_id: Some(YOUTUBE.into()),
            saved_at: Local::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_degrades_to_paused() {
        let mut h = Harness::spawn_with(false, Some(saved(42, true, true)));

        let status = h.handle.query().await.unwrap();
        assert!(!status.running());
        assert_eq!(status.remaining_seconds(), 42);
        assert_eq!(status.state, TimerState::Paused);
        assert!(!h.store.last().unwrap().focus_mode);
        assert_eq!(
            h.drain_effects(),
            vec![exit(YOUTUBE, ExitReason::Interrupted)]
        );

        after_ticks(2).await;
        assert_eq!(h.handle.query().await.unwrap().remaining_seconds(), 42);

        h.handle.start(999, YOUTUBE).await.unwrap();
        assert_eq!(h.handle.query().await.unwrap().remaining_seconds(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_can_resume_ticking() {
        let mut h = Harness::spawn_with(true, Some(saved(42, true, true)));

        after_ticks(1).await;
        let status = h.handle.query().await.unwrap();
        assert!(status.running());
        assert_eq!(status.remaining_seconds(), 41);
        assert_eq!(h.drain_effects(), vec![enter(YOUTUBE)]);
    }

    #[tokio::test(start_paused = true)]
    async fn recovered_pause_stays_paused_even_when_resuming() {
        let h = Harness::spawn_with(true, Some(saved(42, false, false)));

        after_ticks(1).await;
        let status = h.handle.query().await.unwrap();
        assert_eq!(status.state, TimerState::Paused);
        assert_eq!(status.remaining_seconds(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn recovered_idle_record_sets_the_idle_value() {
        let record = StoredSnapshot {
            subject_id: None,
            timer_state: TimerSnapshot::idle(20),
            ..saved(0, false, false)
        };
        let h = Harness::spawn_with(false, Some(record));

        let status = h.handle.query().await.unwrap();
        assert_eq!(status.state, TimerState::Idle);
        assert_eq!(status.remaining_seconds(), 20);
        assert_eq!(status.subject_id, None);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_keeps_the_running_flag() {
        let h = Harness::spawn();
        h.handle.start(10, "tab-1").await.unwrap();
        after_ticks(1).await;

        h.handle.shutdown().await.unwrap();
        let last = h.store.last().unwrap();
        assert!(last.timer_state.running);
        assert_eq!(last.timer_state.remaining_seconds, 9);

        assert!(matches!(
            h.handle.query().await,
            Err(AuthorityError::Closed)
        ));
    }
}
