//! WebSocket gateway
//!
//! Each socket gets a [`Connection`] handle and a [`ClientLink`] that feeds
//! its frames to the handlers one at a time, in arrival order. Outbound
//! events go through a writer task that owns the socket's sink.

use crate::config::AppState;
use crate::connection::Connection;
use crate::handlers;
use crate::protocol::Envelope;
use crate::session::SessionId;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

/// Server side of one client connection, independent of the socket.
pub struct ClientLink {
    state: AppState,
    conn: Arc<Connection>,
    attached: HashSet<SessionId>,
}

impl ClientLink {
    /// Register a new connection. Its first session is minted and announced
    /// right away, so the returned queue already holds the `session` event.
    pub fn open(state: AppState) -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (conn, outbound) = Connection::open();
        let session = state.sessions.resolve(None, Some(&conn));

        let mut attached = HashSet::new();
        attached.insert(session.id().clone());

        info!(conn = %conn.id(), session = %session.id(), "client connected");
        (
            Self {
                state,
                conn,
                attached,
            },
            outbound,
        )
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Handle one text frame. Frames that are not envelopes are dropped.
    pub async fn handle_text(&mut self, text: &str) {
        match serde_json::from_str::<Envelope>(text) {
            Ok(envelope) => self.handle(envelope).await,
            Err(e) => warn!(conn = %self.conn.id(), "malformed frame: {}", e),
        }
    }

    pub async fn handle(&mut self, envelope: Envelope) {
        let Some(session) = handlers::dispatch(&self.state, &self.conn, envelope).await else {
            return;
        };

        let current = session.id().clone();
        if !self.attached.insert(current.clone()) {
            return;
        }

        // Drop anonymous sessions this connection has moved away from.
        let sessions = &self.state.sessions;
        let conn_id = self.conn.id();
        self.attached
            .retain(|id| *id == current || !sessions.discard_anonymous(id, conn_id));
    }

    /// Detach every session this connection touched.
    pub fn close(self) {
        let mut detached = 0;
        for id in &self.attached {
            if self.state.sessions.detach(id, self.conn.id()) {
                detached += 1;
            }
        }
        info!(conn = %self.conn.id(), detached, "client disconnected");
    }
}

async fn serve_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (mut link, mut outbound) = ClientLink::open(state);
    let conn_id = link.connection().id();

    let writer = tokio::spawn(async move {
        while let Some(envelope) = outbound.recv().await {
            let text = match serde_json::to_string(&envelope) {
                Ok(text) => text,
                Err(e) => {
                    error!(conn = %conn_id, "failed to encode {}: {}", envelope.event, e);
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => link.handle_text(text.as_str()).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(conn = %conn_id, "socket read failed: {}", e);
                break;
            }
        }
    }

    // Dropping the link's handle closes the outbound queue and ends the writer.
    link.close();
    if let Err(e) = writer.await {
        warn!(conn = %conn_id, "writer task failed: {}", e);
    }
}
