//! The WebSocket transport layer.
//!
//! One task per connection reads frames and dispatches them; a writer
//! task drains the session's outbound queue onto the wire. The
//! handshake is authenticated before the upgrade, so an unauthorized
//! transport never reaches the session registry and never receives an
//! event. Disconnect synchronously unregisters the session and feeds
//! the presence offline path -- the one mandatory cleanup hook.

use std::collections::HashSet;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use parley_shared::error::RelayError;
use parley_shared::protocol::{ClientEvent, ServerEvent, SignalKind, SignalingEnvelope};
use parley_shared::types::{CallId, ConnectionId, ConversationId, UserId};
use parley_store::Conversation;

use crate::api::AppState;
use crate::error::ServerError;

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// `GET /ws?token=...` -- authenticate, then upgrade.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ServerError> {
    let credential = query
        .token
        .ok_or_else(|| ServerError::Unauthorized("missing token".to_string()))?;

    let user_id = state
        .authenticator
        .authenticate(&credential)
        .await
        .map_err(ServerError::from)?;

    Ok(ws.on_upgrade(move |socket| handle_socket(state, user_id, socket)))
}

async fn handle_socket(state: AppState, user_id: UserId, socket: WebSocket) {
    let connection_id = ConnectionId::new();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerEvent>();

    // Writer task: drain the outbound queue onto the wire. A failed
    // write means the transport is gone; the read loop notices and
    // runs cleanup.
    let writer = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "failed to encode server event");
                    continue;
                }
            };
            if ws_tx.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let came_online = state
        .registry
        .register(user_id, connection_id, outbound_tx.clone())
        .await;

    info!(
        user = %user_id.short(),
        connection = %connection_id,
        "session registered"
    );

    if came_online {
        state.presence.user_online(user_id).await;
    }

    while let Some(frame) = ws_rx.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!(connection = %connection_id, error = %e, "socket read failed");
                break;
            }
        };

        match frame {
            WsMessage::Text(text) => {
                let event = match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => event,
                    Err(e) => {
                        // malformed frames are fatal to this connection only
                        let err = RelayError::Transport(format!("malformed event: {e}"));
                        let _ = outbound_tx.send(ServerEvent::from(&err));
                        break;
                    }
                };

                if let Err(err) = handle_event(&state, user_id, event).await {
                    let _ = outbound_tx.send(ServerEvent::from(&err));
                }
            }
            WsMessage::Close(_) => break,
            // axum answers pings itself; binary frames are not part of
            // the protocol and are ignored
            WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Binary(_) => {}
        }
    }

    if let Some(went_offline) = state.registry.unregister(connection_id).await {
        state.presence.user_offline(went_offline).await;
    }
    writer.abort();

    info!(
        user = %user_id.short(),
        connection = %connection_id,
        "session closed"
    );
}

async fn handle_event(
    state: &AppState,
    user_id: UserId,
    event: ClientEvent,
) -> Result<(), RelayError> {
    match event {
        ClientEvent::ConversationStart { participants } => {
            start_conversation(state, user_id, participants).await
        }

        ClientEvent::ConversationAdd {
            conversation_id,
            user_id: new_member,
        } => add_participant(state, user_id, conversation_id, new_member).await,

        ClientEvent::MessageSend {
            conversation_id,
            body,
        } => {
            state.dispatcher.send(user_id, conversation_id, body).await?;
            Ok(())
        }

        ClientEvent::MessageDelivered { message_id } => {
            state.dispatcher.mark_delivered(user_id, message_id).await
        }

        ClientEvent::MessageRead { message_id } => {
            state.dispatcher.mark_read(user_id, message_id).await
        }

        ClientEvent::CallOffer {
            to,
            call_id,
            payload,
        } => {
            relay_signal(state, user_id, to, call_id, SignalKind::Offer(payload)).await
        }

        ClientEvent::CallAnswer {
            to,
            call_id,
            payload,
        } => {
            relay_signal(state, user_id, to, call_id, SignalKind::Answer(payload)).await
        }

        ClientEvent::CallIce {
            to,
            call_id,
            payload,
        } => {
            relay_signal(state, user_id, to, call_id, SignalKind::IceCandidate(payload)).await
        }

        ClientEvent::CallHangup { to, call_id } => {
            relay_signal(state, user_id, to, call_id, SignalKind::Hangup).await
        }
    }
}

async fn relay_signal(
    state: &AppState,
    from: UserId,
    to: UserId,
    call_id: CallId,
    kind: SignalKind,
) -> Result<(), RelayError> {
    state
        .signaling
        .relay(SignalingEnvelope {
            call_id,
            from,
            to,
            kind,
        })
        .await?;
    Ok(())
}

/// Create a conversation from the initiator plus the named
/// participants, then tell every participant's live sessions about it.
async fn start_conversation(
    state: &AppState,
    initiator: UserId,
    participants: Vec<UserId>,
) -> Result<(), RelayError> {
    let mut members: HashSet<UserId> = participants.into_iter().collect();
    members.insert(initiator);

    if members.len() < 2 {
        return Err(RelayError::InvalidRequest(
            "a conversation needs at least two participants".to_string(),
        ));
    }

    for member in &members {
        let known = state
            .store
            .user_exists(member)
            .await
            .map_err(|e| RelayError::Persistence(e.to_string()))?;
        if !known {
            return Err(RelayError::InvalidRequest(format!(
                "unknown participant: {}",
                member.short()
            )));
        }
    }

    let conversation = Conversation::new();
    let member_list: Vec<UserId> = members.iter().copied().collect();
    state
        .store
        .create_conversation(&conversation, &member_list)
        .await
        .map_err(|e| RelayError::Persistence(e.to_string()))?;

    info!(
        conversation = %conversation.id,
        participants = member_list.len(),
        "conversation started"
    );

    let event = ServerEvent::ConversationStarted {
        conversation_id: ConversationId(conversation.id),
        participants: member_list.clone(),
    };
    for member in &member_list {
        state.registry.send_to_user(member, &event).await;
    }

    Ok(())
}

/// Add a participant to a group conversation. Only existing members may
/// invite; membership never shrinks, so there is no removal counterpart.
async fn add_participant(
    state: &AppState,
    requester: UserId,
    conversation_id: ConversationId,
    new_member: UserId,
) -> Result<(), RelayError> {
    let members = state.membership.members_of(conversation_id.0).await?;
    if !members.contains(&requester) {
        return Err(RelayError::NotAMember);
    }

    let known = state
        .store
        .user_exists(&new_member)
        .await
        .map_err(|e| RelayError::Persistence(e.to_string()))?;
    if !known {
        return Err(RelayError::InvalidRequest(format!(
            "unknown participant: {}",
            new_member.short()
        )));
    }

    let newly_added = state
        .store
        .add_member(conversation_id.0, &new_member)
        .await
        .map_err(|e| RelayError::Persistence(e.to_string()))?;

    // the cached participant set is stale either way
    state.membership.invalidate(conversation_id.0).await;

    if newly_added {
        info!(
            conversation = %conversation_id,
            user = %new_member.short(),
            "participant added"
        );

        let event = ServerEvent::ConversationMemberAdded {
            conversation_id,
            user_id: new_member,
        };
        for member in members.iter() {
            state.registry.send_to_user(member, &event).await;
        }
        state.registry.send_to_user(&new_member, &event).await;
    }

    Ok(())
}
