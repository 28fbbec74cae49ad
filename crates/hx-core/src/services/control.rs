//! Line-oriented control protocol.
//!
//! Each non-empty line on a connection names an application to deploy.
//! Progress and failures are written back to the client as timestamped text
//! lines and mirrored to the process log.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::deploy::Deployer;

/// Longest accepted line, terminator excluded.
pub const MAX_LINE_LEN: usize = 1024;

/// Accept control connections until the task is dropped, one tracked task per
/// connection. Connections stop reading once `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    deployer: Arc<Deployer>,
    tracker: TaskTracker,
    cancel: CancellationToken,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let deployer = deployer.clone();
                let cancel = cancel.clone();
                tracker.spawn(async move {
                    info!(%peer, "control connection opened");
                    handle_connection(stream, &deployer, &cancel).await;
                    info!(%peer, "control connection closed");
                });
            }
            Err(e) => {
                warn!(error = %e, "failed to accept control connection");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// Run one deploy per received name until the client disconnects, a read or
/// write fails, a line exceeds [`MAX_LINE_LEN`] or `cancel` fires.
///
/// Cancellation is only observed between lines; a deploy in progress always
/// runs to completion and its reply is sent.
pub async fn handle_connection<S>(stream: S, deployer: &Deployer, cancel: &CancellationToken)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    loop {
        let next = tokio::select! {
            next = lines.next() => next,
            () = cancel.cancelled() => {
                debug!("closing control connection for shutdown");
                return;
            }
        };

        let line = match next {
            Some(Ok(line)) => line,
            None => return,
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                let message =
                    format!("Line longer than {MAX_LINE_LEN} bytes, closing connection");
                warn!("{message}");
                let _ = reply(&mut writer, &message).await;
                return;
            }
            Some(Err(LinesCodecError::Io(e))) => {
                let message = format!("Failed to read from client: {e}");
                warn!("{message}");
                let _ = reply(&mut writer, &message).await;
                return;
            }
        };

        let name = line.trim();
        if name.is_empty() {
            continue;
        }

        let message = match deployer.deploy(name).await {
            Ok(instance) => {
                info!(app = name, port = instance.port, pid = ?instance.pid, "deployed");
                format!("Deployed {name} on port {}", instance.port)
            }
            Err(e) => {
                error!(app = name, error = %e, "deploy failed");
                format!("Could not deploy {name}: {e}")
            }
        };

        if let Err(e) = reply(&mut writer, &message).await {
            debug!(error = %e, "client went away before reply");
            return;
        }
    }
}

async fn reply<W>(writer: &mut W, message: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = format!("{} {message}\n", Local::now().format("%Y/%m/%d %H:%M:%S"));
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}
