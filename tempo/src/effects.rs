//! Best-effort notifications from the authority to outside collaborators
//!
//! Delivery is at-most-once with no acknowledgement. Nothing here can fail
//! a timer command.

use std::fmt;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Stopped,
    Reset,
    Completed,
    /// The authority restarted while focus mode was engaged
    Interrupted,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExitReason::Stopped => "stopped",
            ExitReason::Reset => "reset",
            ExitReason::Completed => "completed",
            ExitReason::Interrupted => "interrupted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    Enter {
        subject_id: String,
    },
    Exit {
        subject_id: String,
        reason: ExitReason,
    },
}

/// Capability the authority uses to announce transitions.
///
/// Implementations must return immediately and swallow delivery failures.
pub trait SideEffectChannel: Send + 'static {
    fn notify_enter(&self, subject_id: &str);
    fn notify_exit(&self, subject_id: &str, reason: ExitReason);
}

/// Broadcast bus; every observer gets its own receiver.
#[derive(Clone)]
pub struct EffectBus {
    tx: broadcast::Sender<SideEffect>,
}

impl EffectBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SideEffect> {
        self.tx.subscribe()
    }

    fn publish(&self, effect: SideEffect) {
        if let Err(broadcast::error::SendError(effect)) = self.tx.send(effect) {
            debug!(?effect, "no side-effect listener, dropping");
        }
    }
}

impl SideEffectChannel for EffectBus {
    fn notify_enter(&self, subject_id: &str) {
        self.publish(SideEffect::Enter {
            subject_id: subject_id.to_string(),
        });
    }

    fn notify_exit(&self, subject_id: &str, reason: ExitReason) {
        self.publish(SideEffect::Exit {
            subject_id: subject_id.to_string(),
            reason,
        });
    }
}

/// Decides which subjects get focus mode.
#[derive(Debug, Clone, Default)]
pub struct FocusPolicy {
    patterns: Vec<String>,
}

impl FocusPolicy {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    pub fn engages(&self, subject_id: &str) -> bool {
        self.patterns
            .iter()
            .any(|pattern| !pattern.is_empty() && subject_id.contains(pattern.as_str()))
    }
}
