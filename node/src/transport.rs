use hashweave_network::{Connection, NetworkError, Result};
use hashweave_types::NodeId;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Open an outbound connection and exchange node ids.
pub async fn dial(endpoint: String, self_id: NodeId, max_frame_bytes: u32) -> Result<Connection> {
    let stream = TcpStream::connect(&endpoint).await?;
    stream.set_nodelay(true)?;
    handshake(stream, self_id, max_frame_bytes).await
}

async fn handshake(stream: TcpStream, self_id: NodeId, max_frame_bytes: u32) -> Result<Connection> {
    match tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        Connection::handshake(Box::new(stream), self_id, max_frame_bytes),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(NetworkError::Negotiation("handshake timed out".into())),
    }
}

/// Accept inbound connections and hand every identified one to `accepted`.
pub async fn accept_loop(
    listener: TcpListener,
    self_id: NodeId,
    max_frame_bytes: u32,
    accepted: mpsc::Sender<Connection>,
    cancel: CancellationToken,
) {
    loop {
        let (stream, remote) = tokio::select! {
            _ = cancel.cancelled() => return,
            result = listener.accept() => match result {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(target = "transport", error = %err, "accept failed");
                    continue;
                }
            },
        };
        if let Err(err) = stream.set_nodelay(true) {
            debug!(target = "transport", %remote, error = %err, "could not disable nagle");
        }
        let accepted = accepted.clone();
        tokio::spawn(async move {
            match handshake(stream, self_id, max_frame_bytes).await {
                Ok(connection) => {
                    debug!(target = "transport", %remote, peer = %connection.peer(), "inbound connection");
                    let _ = accepted.send(connection).await;
                }
                Err(err) => warn!(target = "transport", %remote, error = %err, "inbound handshake failed"),
            }
        });
    }
}
