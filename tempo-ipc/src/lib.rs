//! Inter-process communication between tempo and its clients
//!
//! We use Unix domain sockets for local IPC. Every message is one line of
//! JSON: a client writes a `Command`, the authority answers with exactly one
//! `Response`. A connection can carry as many exchanges as the client wants,
//! which is what a polling client relies on.

pub mod client;

use chrono::{DateTime, Local};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Commands a client can send to the tempo authority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Start a countdown, or resume the paused one
    Start {
        duration_seconds: u64,
        subject_id: String,
    },
    /// Pause the countdown, keeping the remaining time
    Stop,
    /// Drop the countdown and show `default_duration_seconds` as idle
    Reset { default_duration_seconds: u64 },
    /// Read the live timer state
    Query,
    /// Read the last durable record
    Snapshot,
    /// Is focus mode engaged?
    FocusStatus,
    /// The controlled subject was reloaded or replaced
    Retarget { subject_id: String },
}

/// Responses from tempo back to the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Accepted(bool),
    Status(TimerStatus),
    Snapshot(Option<StoredSnapshot>),
    Focus(bool),
    Error(String),
}

/// The observable countdown values.
///
/// `running` implies `remaining_seconds > 0`: a countdown that hits zero
/// leaves the running state in the same step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSnapshot {
    pub remaining_seconds: u64,
    pub total_duration_seconds: u64,
    pub running: bool,
}

impl TimerSnapshot {
    /// A stopped snapshot showing a full `duration`.
    pub const fn idle(duration_seconds: u64) -> Self {
        Self {
            remaining_seconds: duration_seconds,
            total_duration_seconds: duration_seconds,
            running: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerState {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
}

/// Answer to `Command::Query`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerStatus {
    #[serde(flatten)]
    pub snapshot: TimerSnapshot,
    pub state: TimerState,
    pub subject_id: Option<String>,
}

impl TimerStatus {
    pub fn running(&self) -> bool {
        self.snapshot.running
    }

    pub fn remaining_seconds(&self) -> u64 {
        self.snapshot.remaining_seconds
    }
}

/// The durable record the authority writes after every state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSnapshot {
    pub timer_state: TimerSnapshot,
    /// Whether the side-effect-visible mode is engaged
    pub focus_mode: bool,
    /// Absent for idle records
    #[serde(default)]
    pub subject_id: Option<String>,
    pub saved_at: DateTime<Local>,
}

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection refused - is tempo running?")]
    ConnectionRefused,

    #[error("Connection closed by tempo")]
    Closed,

    #[error("Unexpected response: {0:?}")]
    UnexpectedResponse(Response),
}

pub const SOCKET_PATH: &str = "/tmp/tempo.sock";

/// Write one message as a JSON line and flush it.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), IpcError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one JSON line. `Ok(None)` means the peer hung up.
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>, IpcError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line.trim_end())?))
}

/// Render seconds as `mm:ss`. Minutes are not wrapped into hours.
pub fn format_clock(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}
