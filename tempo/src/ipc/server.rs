//! Unix domain socket server for IPC

use crate::authority::AuthorityHandle;
use anyhow::{Context, Result};
use std::fs;
use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempo_ipc::{read_message, write_message, Command, IpcError, Response};
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

/// Accept clients until `shutdown` resolves, then remove the socket.
pub async fn serve<F>(socket_path: &Path, authority: AuthorityHandle, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    if let Some(parent) = socket_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create socket directory {:?}", parent))?;
    }

    // Remove old socket if it exists
    let _ = fs::remove_file(socket_path);

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("Failed to bind {:?}", socket_path))?;
    if let Err(e) = fs::set_permissions(socket_path, fs::Permissions::from_mode(0o600)) {
        warn!("Cannot restrict {} to its owner: {}", socket_path.display(), e);
    }
    info!("IPC server listening on {}", socket_path.display());

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let authority = authority.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, authority).await {
                            error!("Error handling client: {:#}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                }
            }
        }
    }

    let _ = fs::remove_file(socket_path);
    info!("IPC server stopped");
    Ok(())
}

/// Answer commands on one connection until the client hangs up.
async fn handle_client(stream: UnixStream, authority: AuthorityHandle) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    loop {
        let command = match read_message::<_, Command>(&mut reader).await {
            Ok(Some(command)) => command,
            Ok(None) => break,
            Err(IpcError::Serialization(e)) => {
                warn!("Malformed command: {}", e);
                let response = Response::Error(format!("malformed command: {}", e));
                write_message(&mut writer, &response).await?;
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        debug!(?command, "Received command");
        match authority.dispatch(command).await {
            Ok(response) => write_message(&mut writer, &response).await?,
            Err(e) => {
                write_message(&mut writer, &Response::Error(e.to_string())).await?;
                break;
            }
        }
    }

    Ok(())
}
