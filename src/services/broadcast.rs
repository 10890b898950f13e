//! Delivery of server messages to sockets on this node.

use axum::extract::ws::Message;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    dao::models::RoomEntity,
    dto::ws::OutboundMessage,
    state::{SharedState, contest::ConnectionId},
};

/// The socket's writer task is gone.
#[derive(Debug, Error)]
#[error("connection closed")]
pub struct ConnectionClosed;

/// Serialize a payload and push it onto a socket's writer channel.
///
/// Serialization failures are logged and swallowed since retrying would not help.
pub fn send_message<T>(tx: &mpsc::UnboundedSender<Message>, value: &T) -> Result<(), ConnectionClosed>
where
    T: ?Sized + Serialize + std::fmt::Debug,
{
    let payload = match serde_json::to_string(value) {
        Ok(p) => p,
        Err(err) => {
            warn!(error = %err, "failed to serialize message `{value:?}`");
            return Ok(());
        }
    };

    tx.send(Message::Text(payload.into()))
        .map_err(|_| ConnectionClosed)
}

/// Send to one connection if it is open on this node.
pub fn to_connection(state: &SharedState, connection: ConnectionId, message: &OutboundMessage) {
    let Some(client) = state.connections().get(&connection).map(|entry| entry.tx.clone()) else {
        debug!(%connection, "recipient not connected here");
        return;
    };
    if send_message(&client, message).is_err() {
        debug!(%connection, "recipient writer closed");
    }
}

/// Send to every member connection of `room`.
pub fn to_room(state: &SharedState, room: &RoomEntity, message: &OutboundMessage) {
    for connection in room.members.keys() {
        to_connection(state, *connection, message);
    }
}
