//! Client side of the synchronization protocol
//!
//! A client holds no authoritative state. It rebuilds its view from the
//! authority on attach, issues commands with an optimistic local update,
//! and re-polls while the timer runs so the authority's answer always wins.

use crate::{
    read_message, write_message, Command, IpcError, Response, StoredSnapshot, TimerStatus,
    TimerState,
};
use std::future::Future;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::UnixStream;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Shorter than a tick so the display never lags a full second behind.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Request/response channel to the authority
pub trait Transport {
    fn request(&mut self, command: Command) -> impl Future<Output = Result<Response, IpcError>>;
}

/// Talks to the authority over its Unix socket, keeping one connection
/// open between requests.
pub struct UnixTransport {
    socket_path: PathBuf,
    stream: Option<BufReader<UnixStream>>,
}

impl UnixTransport {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            stream: None,
        }
    }

    async fn connect(&self) -> Result<BufReader<UnixStream>, IpcError> {
        match UnixStream::connect(&self.socket_path).await {
            Ok(stream) => Ok(BufReader::new(stream)),
            Err(e) if matches!(e.kind(), ErrorKind::ConnectionRefused | ErrorKind::NotFound) => {
                Err(IpcError::ConnectionRefused)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exchange(
        stream: &mut BufReader<UnixStream>,
        command: &Command,
    ) -> Result<Response, IpcError> {
        write_message(stream.get_mut(), command).await?;
        read_message(stream).await?.ok_or(IpcError::Closed)
    }
}

impl Transport for UnixTransport {
    async fn request(&mut self, command: Command) -> Result<Response, IpcError> {
        if let Some(stream) = self.stream.as_mut() {
            match Self::exchange(stream, &command).await {
                Ok(response) => return Ok(response),
                Err(IpcError::Io(_) | IpcError::Closed) => {
                    debug!("connection to {} dropped, reconnecting", self.socket_path.display());
                    self.stream = None;
                }
                Err(e) => return Err(e),
            }
        }

        let mut stream = self.connect().await?;
        let response = Self::exchange(&mut stream, &command).await?;
        self.stream = Some(stream);
        Ok(response)
    }
}

/// What the client currently shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientView {
    pub running: bool,
    pub remaining_seconds: u64,
    pub total_duration_seconds: u64,
    pub state: TimerState,
}

impl ClientView {
    fn idle(duration_seconds: u64) -> Self {
        Self {
            running: false,
            remaining_seconds: duration_seconds,
            total_duration_seconds: duration_seconds,
            state: TimerState::Idle,
        }
    }
}

/// How a `follow` loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed,
    Stopped,
    Unreachable,
}

pub struct TimerClient<T> {
    transport: T,
    view: ClientView,
    default_duration_seconds: u64,
    poll_interval: Duration,
}

impl<T: Transport> TimerClient<T> {
    pub fn new(transport: T, default_duration_seconds: u64) -> Self {
        Self {
            transport,
            view: ClientView::idle(default_duration_seconds),
            default_duration_seconds,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn view(&self) -> ClientView {
        self.view
    }

    /// Rebuild the view from the authority.
    ///
    /// A running timer is adopted as-is. Otherwise the last durable record
    /// decides between showing a paused value and the default duration.
    pub async fn attach(&mut self) -> Result<ClientView, IpcError> {
        let status = self.query().await?;
        if status.running() {
            self.adopt(&status);
            return Ok(self.view);
        }

        self.view = match self.stored().await? {
            Some(stored) if stored.timer_state.remaining_seconds > 0 => ClientView {
                running: false,
                remaining_seconds: stored.timer_state.remaining_seconds,
                total_duration_seconds: stored.timer_state.total_duration_seconds,
                state: if stored.subject_id.is_some() {
                    TimerState::Paused
                } else {
                    TimerState::Idle
                },
            },
            _ => ClientView::idle(self.default_duration_seconds),
        };
        Ok(self.view)
    }

    /// Re-query the authority and let its answer override the local view.
    pub async fn poll(&mut self) -> Result<ClientView, IpcError> {
        let status = self.query().await?;
        if status.running() != self.view.running {
            debug!(
                local = self.view.running,
                authority = status.running(),
                "local view diverged, reconciling"
            );
        }
        self.adopt(&status);
        Ok(self.view)
    }

    pub async fn start(&mut self, duration_seconds: u64, subject_id: impl Into<String>) -> bool {
        self.view.running = true;
        self.send(Command::Start {
            duration_seconds,
            subject_id: subject_id.into(),
        })
        .await
    }

    pub async fn stop(&mut self) -> bool {
        self.view.running = false;
        self.send(Command::Stop).await
    }

    pub async fn reset(&mut self) -> bool {
        self.view = ClientView::idle(self.default_duration_seconds);
        self.send(Command::Reset {
            default_duration_seconds: self.default_duration_seconds,
        })
        .await
    }

    /// Poll until the authority reports the timer is no longer running.
    ///
    /// `on_update` sees every reconciled view, including the final one.
    pub async fn follow<F>(&mut self, mut on_update: F) -> SyncOutcome
    where
        F: FnMut(&ClientView),
    {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match self.poll().await {
                Ok(view) => {
                    on_update(&view);
                    if !view.running {
                        return if view.state == TimerState::Completed {
                            SyncOutcome::Completed
                        } else {
                            SyncOutcome::Stopped
                        };
                    }
                }
                Err(e) => {
                    warn!(error = %e, "lost contact with tempo");
                    return SyncOutcome::Unreachable;
                }
            }
        }
    }

    /// Fire a command. Failures are logged and left for the next poll.
    async fn send(&mut self, command: Command) -> bool {
        match self.transport.request(command).await {
            Ok(Response::Accepted(accepted)) => accepted,
            Ok(other) => {
                warn!(response = ?other, "unexpected response to command");
                false
            }
            Err(e) => {
                warn!(error = %e, "command not delivered, next poll will reconcile");
                false
            }
        }
    }

    async fn query(&mut self) -> Result<TimerStatus, IpcError> {
        match self.transport.request(Command::Query).await? {
            Response::Status(status) => Ok(status),
            other => Err(IpcError::UnexpectedResponse(other)),
        }
    }

    async fn stored(&mut self) -> Result<Option<StoredSnapshot>, IpcError> {
        match self.transport.request(Command::Snapshot).await? {
            Response::Snapshot(stored) => Ok(stored),
            other => Err(IpcError::UnexpectedResponse(other)),
        }
    }

    fn adopt(&mut self, status: &TimerStatus) {
        self.view = ClientView {
            running: status.snapshot.running,
            remaining_seconds: status.snapshot.remaining_seconds,
            total_duration_seconds: status.snapshot.total_duration_seconds,
            state: status.state,
        };
    }
}
