use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{
    future::{self, BoxFuture},
    stream::FuturesOrdered,
    FutureExt, Sink, SinkExt, Stream, StreamExt,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn, Instrument};

use super::dto::{ClientMessage, Outbound, ServerMessage};
use super::services::{may_overlap, respond};
use crate::state::AppState;

/// Scans of one connection analyzed concurrently; reading pauses while this
/// many replies are outstanding.
const MAX_IN_FLIGHT: usize = 8;

const OUTBOUND_BUFFER: usize = 32;

pub fn ws_routes() -> Router<AppState> {
    Router::new().route("/ws", get(ws_upgrade))
}

#[instrument(skip_all)]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (ws_tx, ws_rx) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_BUFFER);

    let guard = state.connections.register(outbound_tx.clone());
    let span = tracing::info_span!("ws", conn_id = %guard.id());
    info!(parent: &span, live = state.connections.len(), "connection opened");

    let writer = tokio::spawn(write_outbound(ws_tx, outbound_rx).instrument(span.clone()));

    let inbound = ws_rx
        .take_while(|frame| {
            future::ready(match frame {
                Ok(Message::Close(_)) => false,
                Ok(_) => true,
                Err(e) => {
                    warn!(error = %e, "websocket read failed");
                    false
                }
            })
        })
        .filter_map(|frame| future::ready(frame.ok().and_then(frame_text)));

    run_session(state.clone(), inbound, outbound_tx)
        .instrument(span.clone())
        .await;

    drop(guard);
    let _ = writer.await;
    info!(parent: &span, live = state.connections.len(), "connection closed");
}

/// Serializes replies onto the socket in queue order, numbering them from 1.
async fn write_outbound<W>(mut sink: W, mut outbound: mpsc::Receiver<ServerMessage>)
where
    W: Sink<Message> + Unpin,
{
    let mut seq = 0u64;
    while let Some(msg) = outbound.recv().await {
        seq += 1;
        let json = match serde_json::to_string(&Outbound::new(seq, &msg)) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "serialize outbound message failed");
                continue;
            }
        };
        if sink.send(Message::Text(json)).await.is_err() {
            debug!("send failed, client gone");
            break;
        }
    }
}

fn frame_text(msg: Message) -> Option<String> {
    match msg {
        Message::Text(text) => Some(text),
        Message::Binary(bytes) => String::from_utf8(bytes).ok(),
        _ => None,
    }
}

/// Drives one connection. Messages take effect in arrival order: scans
/// (up to `MAX_IN_FLIGHT` at once) may overlap each other, while confirm and
/// history wait until every earlier message has finished. Replies go out in
/// arrival order. When the inbound side ends, outstanding work still runs to
/// completion.
pub(crate) async fn run_session<S>(state: AppState, inbound: S, outbound: mpsc::Sender<ServerMessage>)
where
    S: Stream<Item = String>,
{
    tokio::pin!(inbound);
    let mut in_flight: FuturesOrdered<BoxFuture<'static, ServerMessage>> = FuturesOrdered::new();
    let mut reading = true;

    loop {
        tokio::select! {
            frame = inbound.next(), if reading && in_flight.len() < MAX_IN_FLIGHT => match frame {
                Some(text) => {
                    let parsed = ClientMessage::parse(&text);
                    if may_overlap(&parsed) {
                        let st = state.clone();
                        in_flight.push_back(async move { respond(&st, parsed).await }.boxed());
                    } else {
                        while let Some(reply) = in_flight.next().await {
                            deliver(&state, &outbound, reply).await;
                        }
                        let reply = respond(&state, parsed).await;
                        deliver(&state, &outbound, reply).await;
                    }
                }
                None => reading = false,
            },
            Some(reply) = in_flight.next(), if !in_flight.is_empty() => {
                deliver(&state, &outbound, reply).await;
            },
            else => break,
        }
    }
}

async fn deliver(state: &AppState, outbound: &mpsc::Sender<ServerMessage>, reply: ServerMessage) {
    if let Err(mpsc::error::SendError(reply)) = outbound.send(reply).await {
        debug!("reply dropped, writer closed");
        // the client never learned this id, so it can never confirm it
        if let ServerMessage::ScanResult { data } = reply {
            state.pending.discard(&data.id);
        }
    }
}
