use tempo_ipc::TimerSnapshot;

/// Result of a single tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Continue,
    Completed,
}

/// Countdown values of one active timer.
///
/// Keeps `running` and `remaining_seconds` consistent: a countdown at zero
/// is never running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Countdown {
    snapshot: TimerSnapshot,
}

impl Countdown {
    pub fn new(duration_seconds: u64) -> Self {
        Self {
            snapshot: TimerSnapshot::idle(duration_seconds),
        }
    }

    /// Rebuild a paused countdown from a stored snapshot.
    pub fn restore(snapshot: TimerSnapshot) -> Self {
        Self {
            snapshot: TimerSnapshot {
                remaining_seconds: snapshot.remaining_seconds,
                total_duration_seconds: snapshot
                    .total_duration_seconds
                    .max(snapshot.remaining_seconds),
                running: false,
            },
        }
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        self.snapshot
    }

    pub fn remaining(&self) -> u64 {
        self.snapshot.remaining_seconds
    }

    pub fn is_running(&self) -> bool {
        self.snapshot.running
    }

    /// Has time left to count, so a start resumes instead of restarting.
    pub fn is_resumable(&self) -> bool {
        self.snapshot.remaining_seconds > 0
    }

    /// Returns false when there is nothing left to run.
    pub fn resume(&mut self) -> bool {
        self.snapshot.running = self.is_resumable();
        self.snapshot.running
    }

    /// Returns true if the countdown was running.
    pub fn pause(&mut self) -> bool {
        std::mem::replace(&mut self.snapshot.running, false)
    }

    pub fn tick(&mut self) -> Tick {
        self.snapshot.remaining_seconds = self.snapshot.remaining_seconds.saturating_sub(1);
        if self.snapshot.remaining_seconds == 0 {
            self.snapshot.running = false;
            Tick::Completed
        } else {
            Tick::Continue
        }
    }
}
