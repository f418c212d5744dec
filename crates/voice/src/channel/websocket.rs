//! WebSocket relay connector

use super::{RelayConnector, RelayFrame, RelayLink};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Opens relay links over tokio-tungstenite
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl RelayConnector for WebSocketConnector {
    async fn open(&self, url: &str) -> Result<RelayLink> {
        info!("Connecting to relay: {}", url);

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::WebSocketError(format!("Failed to connect: {}", e)))?;

        let (write, read) = ws_stream.split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        tokio::spawn(sender_task(write, out_rx));
        tokio::spawn(receiver_task(read, in_tx));

        Ok(RelayLink::new(out_tx, in_rx))
    }
}

/// Sender task: writes queued text frames until the link is dropped
async fn sender_task(
    mut write: futures::stream::SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<String>,
) {
    while let Some(text) = rx.recv().await {
        if let Err(e) = write.send(Message::Text(text)).await {
            error!("Failed to send WebSocket message: {}", e);
            break;
        }
    }

    if let Err(e) = write.close().await {
        debug!("WebSocket close failed: {}", e);
    }
    debug!("Sender task terminated");
}

/// Receiver task: forwards text frames and reports how the socket ended
async fn receiver_task(
    mut read: futures::stream::SplitStream<WsStream>,
    tx: mpsc::UnboundedSender<RelayFrame>,
) {
    let reason = loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                if tx.send(RelayFrame::Text(text)).is_err() {
                    // link dropped locally
                    debug!("Receiver task terminated");
                    return;
                }
            }
            Some(Ok(Message::Close(frame))) => {
                info!("WebSocket connection closed");
                break frame.map(|f| f.reason.to_string());
            }
            Some(Err(e)) => {
                error!("WebSocket error: {}", e);
                break Some(e.to_string());
            }
            None => break None,
            Some(Ok(_)) => {}
        }
    };

    let _ = tx.send(RelayFrame::Closed(reason));
    debug!("Receiver task terminated");
}
