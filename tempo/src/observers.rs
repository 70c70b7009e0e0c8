//! Collaborators listening on the side-effect bus
//!
//! Each observer owns a receiver and reacts on its own task. None of them
//! can slow the authority down or report back to it.

use crate::config::Config;
use crate::effects::{EffectBus, ExitReason, SideEffect};
use tokio::process::Command;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Spawn every observer the config asks for.
pub fn spawn_all(config: &Config, bus: &EffectBus) -> Vec<JoinHandle<()>> {
    let mut observers = Vec::new();

    if config.completion.desktop_notification {
        observers.push(tokio::spawn(desktop_notifications(bus.subscribe())));
    }
    if let Some(url) = config.completion.redirect_url.clone() {
        let opener = config.completion.opener.clone();
        observers.push(tokio::spawn(redirect_on_completion(
            bus.subscribe(),
            opener,
            url,
        )));
    }
    if let Some(hook) = config.focus.hook.clone() {
        observers.push(tokio::spawn(focus_hook(bus.subscribe(), hook)));
    }

    observers
}

/// Next effect, skipping over a lag. `None` once the bus is gone.
async fn next_effect(rx: &mut broadcast::Receiver<SideEffect>) -> Option<SideEffect> {
    loop {
        match rx.recv().await {
            Ok(effect) => return Some(effect),
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "Observer fell behind, skipping effects");
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

async fn desktop_notifications(mut rx: broadcast::Receiver<SideEffect>) {
    while let Some(effect) = next_effect(&mut rx).await {
        let SideEffect::Exit {
            reason: ExitReason::Completed,
            ..
        } = effect
        else {
            continue;
        };

        // notify-rust blocks on the session bus.
        let shown = tokio::task::spawn_blocking(|| {
            notify_rust::Notification::new()
                .summary("Time's up!")
                .body("Focus session completed.")
                .appname("tempo")
                .show()
                .map(|_| ())
        })
        .await;
        match shown {
            Ok(Ok(())) => debug!("Completion notification shown"),
            Ok(Err(e)) => warn!("Failed to send notification: {}", e),
            Err(e) => warn!("Notification task failed: {}", e),
        }
    }
}

async fn redirect_on_completion(
    mut rx: broadcast::Receiver<SideEffect>,
    opener: String,
    url: String,
) {
    while let Some(effect) = next_effect(&mut rx).await {
        if let SideEffect::Exit {
            subject_id,
            reason: ExitReason::Completed,
        } = effect
        {
            info!(subject_id = %subject_id, url = %url, "Redirecting after completion");
            run_detached(Command::new(&opener).arg(&url));
        }
    }
}

/// Runs `<hook> enter <subject>` and `<hook> exit <subject> <reason>`.
async fn focus_hook(mut rx: broadcast::Receiver<SideEffect>, hook: String) {
    while let Some(effect) = next_effect(&mut rx).await {
        let mut command = Command::new(&hook);
        match &effect {
            SideEffect::Enter { subject_id } => {
                command.arg("enter").arg(subject_id);
            }
            SideEffect::Exit { subject_id, reason } => {
                command.arg("exit").arg(subject_id).arg(reason.to_string());
            }
        }
        run_detached(&mut command);
    }
}

/// Spawn and reap in the background; the outcome is only logged.
fn run_detached(command: &mut Command) {
    let program = command.as_std().get_program().to_string_lossy().into_owned();
    match command.kill_on_drop(false).spawn() {
        Ok(mut child) => {
            tokio::spawn(async move {
                match child.wait().await {
                    Ok(status) if status.success() => debug!(program = %program, "Collaborator finished"),
                    Ok(status) => warn!(program = %program, %status, "Collaborator failed"),
                    Err(e) => warn!(program = %program, "Failed to wait for collaborator: {}", e),
                }
            });
        }
        Err(e) => warn!(program = %program, "Failed to run collaborator: {}", e),
    }
}
