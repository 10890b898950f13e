use std::collections::HashSet;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    dto::ws::{InboundAction, InboundMessage, OutboundMessage},
    error::ServiceError,
    services::{
        broadcast::send_message,
        identity::AuthError,
        membership_service::{self, Departure},
        round_service,
    },
    state::{
        ClientConnection, SharedState,
        contest::{ConnectionId, Identity},
    },
};

/// Handle the full lifecycle of one participant socket.
///
/// Frames from one socket are handled in arrival order; different sockets run
/// concurrently. Every frame carries its own session token.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps broadcasts flowing even while an action is in progress.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let connection = ConnectionId::new();
    state.connections().insert(
        connection,
        ClientConnection {
            id: connection,
            tx: outbound_tx.clone(),
        },
    );
    info!(%connection, "client connected");

    // Identities that took a seat through this socket.
    let mut seated: HashSet<Identity> = HashSet::new();

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                debug!(%connection, payload = %text, "received client frame");
                let reply = handle_frame(&state, connection, &mut seated, text.as_str()).await;
                if let Some(reply) = reply {
                    if send_message(&outbound_tx, &reply).is_err() {
                        info!(%connection, "writer closed while replying, terminating");
                        break;
                    }
                }
            }
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                info!(%connection, "client closed");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {}
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(%connection, error = %err, "websocket error");
                break;
            }
        }
    }

    state.connections().remove(&connection);
    for identity in seated {
        match membership_service::leave_room(&state, &identity, Departure::Disconnect(connection))
            .await
        {
            Ok(Some(code)) => info!(%connection, room = %code, participant = %identity, "seat released on disconnect"),
            Ok(None) => {}
            Err(err) => warn!(%connection, participant = %identity, error = %err, "disconnect cleanup failed"),
        }
    }
    info!(%connection, "client disconnected");

    finalize(writer_task, outbound_tx).await;
}

/// Decode, authenticate and run one frame. Returns the reply for the caller, if any.
async fn handle_frame(
    state: &SharedState,
    connection: ConnectionId,
    seated: &mut HashSet<Identity>,
    text: &str,
) -> Option<OutboundMessage> {
    let message = match InboundMessage::from_json_str(text) {
        Ok(message) => message,
        Err(err) => {
            warn!(%connection, error = %err, "failed to parse client frame");
            return Some(OutboundMessage::malformed(&err));
        }
    };
    let action = message.action.name();

    let identity = match authenticate(state, message.token.as_deref()).await {
        Ok(identity) => identity,
        Err(err) => {
            debug!(%connection, action, error = %err, "frame rejected");
            return Some(OutboundMessage::failure(Some(action), &err));
        }
    };

    let takes_seat = matches!(
        message.action,
        InboundAction::CreateRoom(_) | InboundAction::JoinRoom(_)
    );

    match dispatch(state, connection, &identity, message.action).await {
        Ok(reply) => {
            if takes_seat {
                seated.insert(identity);
            }
            reply
        }
        Err(ServiceError::Duplicate) => {
            debug!(%connection, action, participant = %identity, "duplicate request dropped");
            None
        }
        Err(err) => {
            if err.is_internal() {
                error!(%connection, action, participant = %identity, error = %err, "action failed");
            } else {
                debug!(%connection, action, participant = %identity, error = %err, "action refused");
            }
            Some(OutboundMessage::failure(Some(action), &err))
        }
    }
}

async fn authenticate(state: &SharedState, token: Option<&str>) -> Result<Identity, ServiceError> {
    let token = token
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::MissingToken)?;
    Ok(state.identity().verify(token).await?)
}

async fn dispatch(
    state: &SharedState,
    connection: ConnectionId,
    identity: &Identity,
    action: InboundAction,
) -> Result<Option<OutboundMessage>, ServiceError> {
    let reply = match action {
        InboundAction::CreateRoom(request) => {
            let room = membership_service::create_room(state, identity, connection, request).await?;
            Some(OutboundMessage::CreateRoomSuccess { room })
        }
        InboundAction::JoinRoom(request) => {
            let room = membership_service::join_room(state, identity, connection, request).await?;
            Some(OutboundMessage::JoinRoomSuccess { room })
        }
        InboundAction::ExitRoom => {
            let code = membership_service::leave_room(state, identity, Departure::Exit)
                .await?
                .ok_or(ServiceError::NotInRoom)?;
            Some(OutboundMessage::ExitRoomSuccess { code })
        }
        InboundAction::ConfigureRound(request) => {
            let code = membership_service::configure_round(state, identity, request).await?;
            Some(OutboundMessage::ConfigureRoundSuccess { code })
        }
        InboundAction::StartRound(request) => {
            let code = request.room_code()?;
            round_service::start_round(state, identity, request)
                .await?
                .map(|problems| OutboundMessage::StartRoundSuccess { code, problems })
        }
        InboundAction::RecordAnswer(request) => {
            let code = request.room_code()?;
            let index = request.index;
            round_service::record_answer(state, identity, request)
                .await?
                .then_some(OutboundMessage::RecordAnswerSuccess { code, index })
        }
        InboundAction::SubmitAnswer(request) => {
            let code = request.room_code()?;
            let changed = round_service::submit(state, identity, request).await?;
            Some(OutboundMessage::SubmitAnswerSuccess { code, changed })
        }
    };
    Ok(reply)
}

async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
