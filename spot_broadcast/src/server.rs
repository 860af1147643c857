use std::{fmt::Display, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::{
        ws::{Message, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    Router,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::{hub::Hub, Result};

/// Application-level liveness probe sent by clients.
pub const PING: &str = "ping";
/// Fixed answer to [`PING`].
pub const PONG: &str = "pong";

#[derive(Clone)]
struct ServerState {
    hub: Arc<Hub>,
    shutdown: CancellationToken,
}

/// WebSocket upgrade on every path; clients connect to the bare host:port.
pub fn router(hub: Arc<Hub>, shutdown: CancellationToken) -> Router {
    Router::new()
        .fallback(upgrade)
        .with_state(ServerState { hub, shutdown })
}

pub async fn serve(addr: SocketAddr, hub: Arc<Hub>, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_listener(listener, hub, shutdown).await
}

/// Like [`serve`], on a listener the caller already bound.
pub async fn serve_listener(
    listener: TcpListener,
    hub: Arc<Hub>,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "WebSocket server started");

    let app = router(hub, shutdown.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("WebSocket server stopped");
    Ok(())
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<ServerState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        handle_connection(sink, stream, state.hub, state.shutdown).await;
    })
}

/// A send that has not completed within `limit` counts as failed.
async fn send_bounded<Tx>(
    sink: &mut Tx,
    message: Message,
    limit: Duration,
) -> std::result::Result<(), String>
where
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
{
    match tokio::time::timeout(limit, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("no progress within {limit:?}")),
    }
}

/// Drive one subscriber until it closes, errors, is dropped by the hub, or the
/// server shuts down.
///
/// Queued snapshots and `pong` replies share the one sink, so a subscriber
/// sees snapshots in the order the hub produced them. Every write is bounded
/// by the hub's send timeout; a client that stops reading is disconnected.
pub async fn handle_connection<Tx, Rx, E>(
    mut sink: Tx,
    mut stream: Rx,
    hub: Arc<Hub>,
    shutdown: CancellationToken,
) where
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
    Rx: Stream<Item = std::result::Result<Message, E>> + Unpin,
    E: Display,
{
    let limit = hub.settings().send_timeout;
    let (id, mut outbound) = hub.register().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = send_bounded(&mut sink, Message::Close(None), limit).await;
                break;
            }
            payload = outbound.recv() => match payload {
                Some(payload) => {
                    let message = Message::Text(payload.to_string());
                    if let Err(e) = send_bounded(&mut sink, message, limit).await {
                        tracing::warn!(subscriber = %id, error = %e, "Failed to deliver snapshot");
                        break;
                    }
                }
                None => {
                    tracing::debug!(subscriber = %id, "Dropped by hub");
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) if text == PING => {
                    let message = Message::Text(PONG.to_string());
                    if let Err(e) = send_bounded(&mut sink, message, limit).await {
                        tracing::warn!(subscriber = %id, error = %e, "Failed to answer ping");
                        break;
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    tracing::debug!(subscriber = %id, message = %text, "Ignoring client message");
                }
                Some(Ok(Message::Close(_))) | None => break,
                // protocol-level pings are answered by the websocket layer
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(subscriber = %id, error = %e, "WebSocket error");
                    break;
                }
            },
        }
    }

    hub.unregister(id).await;
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use std::{
        pin::Pin,
        task::{Context, Poll},
    };

    use futures::{channel::mpsc, stream};
    use tokio::task::JoinHandle;
    use tokio_tungstenite::tungstenite;

    use super::*;
    use crate::snapshot::{ParkingSnapshot, SpotStatus};

    struct Client {
        to_server: mpsc::UnboundedSender<std::result::Result<Message, Infallible>>,
        from_server: mpsc::UnboundedReceiver<Message>,
        task: JoinHandle<()>,
    }

    fn connect(hub: &Arc<Hub>, shutdown: &CancellationToken) -> Client {
        let (to_server, server_rx) = mpsc::unbounded();
        let (server_tx, from_server) = mpsc::unbounded();
        let task = tokio::spawn(handle_connection(
            server_tx,
            server_rx,
            hub.clone(),
            shutdown.clone(),
        ));
        Client {
            to_server,
            from_server,
            task,
        }
    }

    async fn wait_for_subscribers(hub: &Hub, count: usize) {
        while hub.subscriber_count().await != count {
            tokio::task::yield_now().await;
        }
    }

    fn text(message: &str) -> Message {
        Message::Text(message.to_string())
    }

    #[tokio::test]
    async fn ping_yields_exactly_one_pong() {
        let hub = Arc::new(Hub::default());
        let shutdown = CancellationToken::new();
        let mut client = connect(&hub, &shutdown);
        wait_for_subscribers(&hub, 1).await;

        client.to_server.unbounded_send(Ok(text(PING))).unwrap();
        assert_eq!(client.from_server.next().await, Some(text(PONG)));

        let snapshot = ParkingSnapshot::new(vec![SpotStatus::Empty]);
        hub.broadcast(&snapshot).await.unwrap();
        let Some(Message::Text(payload)) = client.from_server.next().await else {
            panic!("expected a snapshot");
        };
        assert_eq!(ParkingSnapshot::from_json(&payload).unwrap(), snapshot);
        assert!(client.from_server.try_recv().is_err());
    }

    #[tokio::test]
    async fn other_client_text_is_ignored() {
        let hub = Arc::new(Hub::default());
        let shutdown = CancellationToken::new();
        let mut client = connect(&hub, &shutdown);
        wait_for_subscribers(&hub, 1).await;

        client.to_server.unbounded_send(Ok(text("hello"))).unwrap();
        client.to_server.unbounded_send(Ok(text(PING))).unwrap();
        assert_eq!(client.from_server.next().await, Some(text(PONG)));
    }

    #[tokio::test]
    async fn closing_the_stream_unregisters() {
        let hub = Arc::new(Hub::default());
        let shutdown = CancellationToken::new();
        let client = connect(&hub, &shutdown);
        wait_for_subscribers(&hub, 1).await;

        client.to_server.unbounded_send(Ok(Message::Close(None))).unwrap();
        client.task.await.unwrap();
        assert_eq!(hub.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn send_failure_unregisters() {
        let hub = Arc::new(Hub::default());
        let shutdown = CancellationToken::new();
        let Client {
            to_server: _to_server,
            from_server,
            task,
        } = connect(&hub, &shutdown);
        wait_for_subscribers(&hub, 1).await;
        drop(from_server);

        hub.broadcast_text("{}".into()).await;
        task.await.unwrap();
        assert_eq!(hub.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn one_broken_client_does_not_starve_the_others() {
        let hub = Arc::new(Hub::default());
        let shutdown = CancellationToken::new();
        let mut healthy = connect(&hub, &shutdown);
        let broken = connect(&hub, &shutdown);
        let mut also_healthy = connect(&hub, &shutdown);
        wait_for_subscribers(&hub, 3).await;
        drop(broken.from_server);

        let snapshot = ParkingSnapshot::new(vec![SpotStatus::Occupied, SpotStatus::Empty]);
        hub.broadcast(&snapshot).await.unwrap();

        for client in [&mut healthy, &mut also_healthy] {
            let Some(Message::Text(payload)) = client.from_server.next().await else {
                panic!("expected a snapshot");
            };
            assert_eq!(ParkingSnapshot::from_json(&payload).unwrap(), snapshot);
        }
        broken.task.await.unwrap();
        assert_eq!(hub.subscriber_count().await, 2);
    }

    #[tokio::test]
    async fn shutdown_closes_connections() {
        let hub = Arc::new(Hub::default());
        let shutdown = CancellationToken::new();
        let mut client = connect(&hub, &shutdown);
        wait_for_subscribers(&hub, 1).await;

        shutdown.cancel();
        client.task.await.unwrap();
        assert_eq!(client.from_server.next().await, Some(Message::Close(None)));
        assert_eq!(hub.subscriber_count().await, 0);
    }

    type SinkPoll = Poll<std::result::Result<(), Infallible>>;

    /// A peer that never drains its socket: every write stays pending.
    struct StalledSink;

    impl Sink<Message> for StalledSink {
        type Error = Infallible;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> SinkPoll {
            Poll::Pending
        }

        fn start_send(self: Pin<&mut Self>, _: Message) -> std::result::Result<(), Infallible> {
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> SinkPoll {
            Poll::Pending
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> SinkPoll {
            Poll::Pending
        }
    }

    fn connect_stalled(hub: &Arc<Hub>, shutdown: &CancellationToken) -> JoinHandle<()> {
        tokio::spawn(handle_connection(
            StalledSink,
            stream::pending::<std::result::Result<Message, Infallible>>(),
            hub.clone(),
            shutdown.clone(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_client_is_cut_off_after_send_timeout() {
        let hub = Arc::new(Hub::default());
        let shutdown = CancellationToken::new();
        let task = connect_stalled(&hub, &shutdown);
        wait_for_subscribers(&hub, 1).await;

        let report = hub.broadcast_text("{}".into()).await;
        assert_eq!(report.delivered, 1);

        task.await.unwrap();
        assert_eq!(hub.subscriber_count().await, 0);
        assert!(!shutdown.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_client_does_not_hold_up_shutdown() {
        let hub = Arc::new(Hub::default());
        let shutdown = CancellationToken::new();
        let task = connect_stalled(&hub, &shutdown);
        wait_for_subscribers(&hub, 1).await;

        shutdown.cancel();
        task.await.unwrap();
        assert_eq!(hub.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn websocket_clients_on_any_path_get_pongs_and_snapshots() {
        let hub = Arc::new(Hub::default());
        let shutdown = CancellationToken::new();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve_listener(listener, hub.clone(), shutdown.clone()));

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/any/path"))
            .await
            .unwrap();
        wait_for_subscribers(&hub, 1).await;

        ws.send(tungstenite::Message::Text(PING.to_string()))
            .await
            .unwrap();
        assert_eq!(
            ws.next().await.unwrap().unwrap(),
            tungstenite::Message::Text(PONG.to_string())
        );

        let snapshot = ParkingSnapshot::new(vec![SpotStatus::Occupied, SpotStatus::Empty]);
        hub.broadcast(&snapshot).await.unwrap();
        let tungstenite::Message::Text(payload) = ws.next().await.unwrap().unwrap() else {
            panic!("expected a snapshot");
        };
        assert_eq!(payload, r#"{"spot_0":"occupied","spot_1":"empty"}"#);

        shutdown.cancel();
        while let Some(Ok(message)) = ws.next().await {
            if message.is_close() {
                break;
            }
        }
        server.await.unwrap().unwrap();
        wait_for_subscribers(&hub, 0).await;
    }
}
