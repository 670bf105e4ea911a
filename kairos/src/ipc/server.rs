//! Unix domain socket server for IPC

use crate::runtime::RuntimeHandle;
use anyhow::{Context, Result};
use kairos_ipc::{Command, Response};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info};

pub struct IpcServer {
    listener: UnixListener,
    path: PathBuf,
}

impl IpcServer {
    pub fn bind(path: &Path) -> Result<Self> {
        // Remove old socket if it exists
        let _ = std::fs::remove_file(path);

        let listener = UnixListener::bind(path)
            .with_context(|| format!("Failed to bind IPC socket at {}", path.display()))?;
        info!("IPC server listening on {}", path.display());
        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    pub async fn serve(self, runtime: RuntimeHandle) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _)) => {
                    let runtime = runtime.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, runtime).await {
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
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn handle_client(stream: UnixStream, runtime: RuntimeHandle) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    reader.read_line(&mut line).await?;
    let response = match serde_json::from_str::<Command>(&line) {
        Ok(command) => {
            debug!(?command, "IPC request");
            runtime.request(command).await?
        }
        Err(e) => Response::Error(format!("Invalid command: {}", e)),
    };

    let mut response_json = serde_json::to_vec(&response)?;
    response_json.push(b'\n');
    writer.write_all(&response_json).await?;
    writer.shutdown().await?;

    Ok(())
}
