//! WebSocket accept loop and per-connection task.

use crate::config::Config;
use crate::hub::Hub;
use callhub_core::{ClientMessage, PeerId, ServerMessage};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsStream = SplitStream<WebSocketStream<TcpStream>>;

/// Bind `config.listen` and serve until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.listen).await?;
    let hub = Hub::new(&config);
    serve(listener, hub, &config, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    })
    .await
}

/// Accept connections on `listener` until `shutdown` resolves, then clear
/// the hub.
pub async fn serve(
    listener: TcpListener,
    hub: Arc<Hub>,
    config: &Config,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    tracing::info!("Listening on ws://{}", listener.local_addr()?);

    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(config.max_message_bytes);
    ws_config.max_frame_size = Some(config.max_message_bytes);

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, client_addr) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!("Accept failed: {}", e);
                        continue;
                    }
                };
                let hub = hub.clone();
                let ws_config = ws_config.clone();
                let write_timeout = config.write_timeout();
                tokio::spawn(async move {
                    let conn =
                        handle_connection(stream, client_addr, hub, ws_config, write_timeout);
                    if let Err(e) = conn.await {
                        tracing::warn!("Connection error from {}: {}", client_addr, e);
                    }
                });
            }
            _ = &mut shutdown => break,
        }
    }

    hub.shutdown().await;
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    hub: Arc<Hub>,
    ws_config: WebSocketConfig,
    write_timeout: Duration,
) -> anyhow::Result<()> {
    let ws = tokio_tungstenite::accept_async_with_config(stream, Some(ws_config)).await?;
    let (mut sink, mut stream) = ws.split();

    let (id, mut outbox) = hub.connect().await;
    tracing::debug!("New connection from {} as {}", addr, id);

    let result = pump(&hub, &id, &mut sink, &mut stream, &mut outbox, write_timeout).await;

    // Always runs, so a failed socket still ends its call and leaves the
    // directory.
    hub.disconnect(&id).await;
    tracing::debug!("Connection closed: {} ({})", addr, id);
    result
}

async fn pump(
    hub: &Arc<Hub>,
    id: &PeerId,
    sink: &mut WsSink,
    stream: &mut WsStream,
    outbox: &mut mpsc::Receiver<ServerMessage>,
    write_timeout: Duration,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            // Incoming message from client
            msg = stream.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        tracing::debug!("WebSocket error from {}: {}", id, e);
                        return Ok(());
                    }
                    None => return Ok(()),
                };

                match msg {
                    Message::Text(text) => match ClientMessage::decode(&text) {
                        Ok(msg) => hub.handle(id, msg).await,
                        Err(e) => tracing::warn!("Invalid message from {}: {}", id, e),
                    },
                    Message::Close(_) => return Ok(()),
                    _ => {}
                }
            }

            // Routed to this connection by the hub
            out = outbox.recv() => {
                let Some(out) = out else {
                    // Evicted or shut down; the hub has already let go of us.
                    let close = sink.send(Message::Close(None));
                    let _ = tokio::time::timeout(write_timeout, close).await;
                    return Ok(());
                };
                let frame = Message::Text(out.encode()?.into());
                match tokio::time::timeout(write_timeout, sink.send(frame)).await {
                    Ok(sent) => sent?,
                    Err(_) => {
                        tracing::warn!("{} stalled on write, dropping it", id);
                        return Ok(());
                    }
                }
            }
        }
    }
}
