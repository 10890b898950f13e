//! Room creation, membership and pre-round settings.
//!
//! A room and the pointer of each of its members are separate records, so no single
//! compare-and-swap covers both. The pointer is claimed first (insert-if-absent) and acts
//! as the lock that keeps an identity in one room; it is released again if the room write
//! does not go through, and cleared last on departure.

use tracing::{debug, info, warn};
use validator::Validate;

use crate::{
    dao::models::{
        ContestConfigEntity, MemberEntity, ResponseBookEntity, ResponseEntity, ResponseStatus,
        RoomEntity, SeatEntity, SubjectSettingsEntity, keys,
    },
    dto::{
        room::RoomView,
        ws::{ConfigureRoundRequest, CreateRoomRequest, OutboundMessage, RoomRequest},
    },
    error::ServiceError,
    services::{broadcast, round_service},
    state::{
        SharedState,
        contest::{ConnectionId, Identity, RoomCode, now_ms},
        coordinator::{Change, Coordinator, Outcome},
        lifecycle::LifecycleState,
    },
};

/// Fresh codes tried before giving up on room creation.
const CODE_ATTEMPTS: usize = 8;

/// How a member leaves a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// Explicit request; acts on the identity wherever it is connected.
    Exit,
    /// Socket closed; only acts if that socket is still the identity's seat.
    Disconnect(ConnectionId),
}

/// Open a new room hosted by `identity`.
pub async fn create_room(
    state: &SharedState,
    identity: &Identity,
    connection: ConnectionId,
    request: CreateRoomRequest,
) -> Result<RoomView, ServiceError> {
    request.validate()?;
    let Some(_guard) = state.in_flight().try_begin(identity) else {
        return Err(ServiceError::Duplicate);
    };
    let coordinator = state.coordinator().await?;
    let config = state.config();

    for _ in 0..CODE_ATTEMPTS {
        let code = {
            let mut rng = rand::rng();
            RoomCode::generate(&mut rng)
        };
        claim_pointer(&coordinator, identity, &code, connection).await?;

        let room = RoomEntity {
            code: code.clone(),
            title: request.title.trim().to_string(),
            description: request.description.clone(),
            mode: request.mode,
            visibility: request.visibility,
            max_participants: request
                .max_participants
                .unwrap_or(config.default_max_participants),
            round_time_limit_minutes: request
                .round_time_limit_minutes
                .unwrap_or(config.default_round_minutes),
            host: SeatEntity {
                connection,
                identity: identity.clone(),
            },
            members: [(connection, identity.clone())].into_iter().collect(),
            lifecycle: LifecycleState::Lobby,
            lifecycle_version: 0,
            round_id: None,
            created_at_ms: now_ms(),
        };

        let created = coordinator
            .mutate(&keys::room(&code), |current: Option<RoomEntity>| match current {
                Some(_) => Err(()),
                None => Ok(Change::Put(room.clone())),
            })
            .await;

        match created {
            Ok(Outcome::Committed(_)) => {}
            Ok(Outcome::Aborted { .. }) => {
                debug!(room = %code, "room code already taken; drawing another");
                release_pointer(&coordinator, identity, &code, connection).await;
                continue;
            }
            Err(err) => {
                release_pointer(&coordinator, identity, &code, connection).await;
                return Err(err.into());
            }
        }

        seed_room_records(state, &coordinator, &room).await?;
        info!(room = %code, host = %identity, "room created");
        return Ok(RoomView::from(&room));
    }

    warn!(attempts = CODE_ATTEMPTS, "no free room code found");
    Err(ServiceError::Transient {
        key: "rooms".into(),
    })
}

async fn seed_room_records(
    state: &SharedState,
    coordinator: &Coordinator,
    room: &RoomEntity,
) -> Result<(), ServiceError> {
    let mut book = ResponseBookEntity::default();
    book.entries
        .insert(room.host.identity.clone(), ResponseEntity::fresh());

    coordinator
        .put(&keys::settings(&room.code), state.config().default_contest())
        .await?;
    coordinator.put(&keys::responses(&room.code), book).await?;
    // A previous room with the same code may have left results behind.
    coordinator.remove(&keys::results(&room.code)).await?;
    Ok(())
}

/// Add `identity` to an existing room.
pub async fn join_room(
    state: &SharedState,
    identity: &Identity,
    connection: ConnectionId,
    request: RoomRequest,
) -> Result<RoomView, ServiceError> {
    request.validate()?;
    let code = request.room_code()?;
    let Some(_guard) = state.in_flight().try_begin(identity) else {
        return Err(ServiceError::Duplicate);
    };
    let coordinator = state.coordinator().await?;

    claim_pointer(&coordinator, identity, &code, connection).await?;

    let joined = coordinator
        .mutate(&keys::room(&code), |current: Option<RoomEntity>| {
            let mut room = current.ok_or_else(|| ServiceError::RoomNotFound(code.clone()))?;
            if room.has_member(identity) {
                return Err(ServiceError::AlreadyInRoom);
            }
            if room.is_full() {
                return Err(ServiceError::RoomFull(code.clone()));
            }
            room.members.insert(connection, identity.clone());
            Ok(Change::Put(room))
        })
        .await
        .map_err(ServiceError::from)
        .and_then(|outcome| outcome.into_result());

    let room = match joined {
        Ok(Some(room)) => room,
        Ok(None) => {
            release_pointer(&coordinator, identity, &code, connection).await;
            return Err(ServiceError::RoomNotFound(code));
        }
        Err(err) => {
            release_pointer(&coordinator, identity, &code, connection).await;
            return Err(err);
        }
    };

    coordinator
        .mutate(
            &keys::responses(&code),
            |current: Option<ResponseBookEntity>| {
                let mut book = current.unwrap_or_default();
                let entry = book
                    .entries
                    .entry(identity.clone())
                    .or_insert_with(ResponseEntity::fresh);
                if entry.status == ResponseStatus::Disconnected {
                    entry.status = ResponseStatus::Unsubmitted;
                }
                Ok::<_, ()>(Change::Put(book))
            },
        )
        .await?;

    info!(room = %code, participant = %identity, members = room.members.len(), "participant joined");
    let view = RoomView::from(&room);
    broadcast::to_room(
        state,
        &room,
        &OutboundMessage::RoomUpdated { room: view.clone() },
    );
    Ok(view)
}

/// Why a departure did not touch the room record.
enum LeaveSkip {
    RoomGone,
    NotMember,
    /// The identity is seated through a newer connection.
    Superseded,
}

/// Remove `identity` from its room. Returns the room left, or `None` when a disconnect
/// had nothing to do.
pub async fn leave_room(
    state: &SharedState,
    identity: &Identity,
    departure: Departure,
) -> Result<Option<RoomCode>, ServiceError> {
    let coordinator = state.coordinator().await?;

    let pointer: Option<MemberEntity> = coordinator.read(&keys::member(identity)).await?;
    let pointer = match (pointer, departure) {
        (None, Departure::Exit) => return Err(ServiceError::NotInRoom),
        (None, Departure::Disconnect(_)) => return Ok(None),
        (Some(pointer), Departure::Disconnect(connection)) if pointer.connection != connection => {
            debug!(participant = %identity, "stale connection closed; seat kept");
            return Ok(None);
        }
        (Some(pointer), _) => pointer,
    };
    let code = pointer.room.clone();

    let outcome = coordinator
        .mutate(&keys::room(&code), |current: Option<RoomEntity>| {
            let Some(mut room) = current else {
                return Err(LeaveSkip::RoomGone);
            };
            if let Departure::Disconnect(connection) = departure {
                if room.connection_of(identity) != Some(connection) {
                    return Err(LeaveSkip::Superseded);
                }
            }
            if !room.remove_member(identity) {
                return Err(LeaveSkip::NotMember);
            }
            if room.members.is_empty() {
                Ok(Change::Delete)
            } else {
                Ok(Change::Put(room))
            }
        })
        .await?;

    match outcome {
        Outcome::Committed(None) => {
            state.round_timers().cancel_any(&code);
            for key in keys::room_scoped(&code) {
                coordinator.remove(&key).await?;
            }
            info!(room = %code, "last member left; room destroyed");
        }
        Outcome::Committed(Some(room)) => {
            info!(
                room = %code,
                participant = %identity,
                host = %room.host.identity,
                "participant left"
            );
            mark_disconnected(state, &coordinator, &room, identity).await?;
            broadcast::to_room(
                state,
                &room,
                &OutboundMessage::RoomUpdated {
                    room: RoomView::from(&room),
                },
            );
        }
        Outcome::Aborted {
            reason: LeaveSkip::Superseded,
            ..
        } => {
            debug!(room = %code, participant = %identity, "seat taken over by another connection");
            return Ok(None);
        }
        Outcome::Aborted {
            reason: LeaveSkip::RoomGone | LeaveSkip::NotMember,
            ..
        } => {
            debug!(room = %code, participant = %identity, "clearing dangling member pointer");
        }
    }

    release_pointer(&coordinator, identity, &code, pointer.connection).await;
    Ok(Some(code))
}

/// Keep the departed member's response for scoring exclusion, and let the round end early
/// if they were the last one still working.
async fn mark_disconnected(
    state: &SharedState,
    coordinator: &Coordinator,
    room: &RoomEntity,
    identity: &Identity,
) -> Result<(), ServiceError> {
    let outcome = coordinator
        .mutate(
            &keys::responses(&room.code),
            |current: Option<ResponseBookEntity>| {
                let mut book = current.ok_or(())?;
                let entry = book.entries.get_mut(identity).ok_or(())?;
                entry.status = ResponseStatus::Disconnected;
                Ok::<_, ()>(Change::Put(book))
            },
        )
        .await?;

    if let (Outcome::Committed(Some(book)), LifecycleState::Active, Some(round_id)) =
        (outcome, room.lifecycle, room.round_id)
    {
        round_service::finish_if_settled(state, &room.code, round_id, &book).await?;
    }
    Ok(())
}

/// Replace the room's contest settings; host only, in the lobby.
pub async fn configure_round(
    state: &SharedState,
    identity: &Identity,
    request: ConfigureRoundRequest,
) -> Result<RoomCode, ServiceError> {
    request.validate()?;
    let code = request.room_code()?;

    if let Some(unknown) = request
        .subjects
        .iter()
        .find(|settings| state.config().subject(&settings.subject).is_none())
    {
        return Err(ServiceError::InvalidInput(format!(
            "unknown subject `{}`",
            unknown.subject
        )));
    }

    let contest = ContestConfigEntity {
        subjects: request
            .subjects
            .iter()
            .map(|settings| {
                (
                    settings.subject.clone(),
                    SubjectSettingsEntity {
                        selected: settings.selected,
                        problem_count: settings.problem_count,
                        correct_score: settings.correct_score,
                        blank_score: settings.blank_score,
                    },
                )
            })
            .collect(),
    };

    let coordinator = state.coordinator().await?;
    let room = coordinator
        .mutate(&keys::room(&code), |current: Option<RoomEntity>| {
            let mut room = current.ok_or_else(|| ServiceError::RoomNotFound(code.clone()))?;
            if !room.is_host(identity) {
                return Err(ServiceError::PermissionDenied(
                    "only the host can change round settings".into(),
                ));
            }
            if room.lifecycle != LifecycleState::Lobby {
                return Err(ServiceError::InvalidState(
                    "round settings can only change in the lobby".into(),
                ));
            }
            if let Some(minutes) = request.round_time_limit_minutes {
                room.round_time_limit_minutes = minutes;
            }
            Ok(Change::Put(room))
        })
        .await?
        .into_result()?
        .ok_or_else(|| ServiceError::RoomNotFound(code.clone()))?;

    coordinator.put(&keys::settings(&code), contest).await?;

    debug!(room = %code, "round settings updated");
    broadcast::to_room(
        state,
        &room,
        &OutboundMessage::RoomUpdated {
            room: RoomView::from(&room),
        },
    );
    Ok(code)
}

async fn claim_pointer(
    coordinator: &Coordinator,
    identity: &Identity,
    code: &RoomCode,
    connection: ConnectionId,
) -> Result<(), ServiceError> {
    coordinator
        .mutate(&keys::member(identity), |current: Option<MemberEntity>| {
            match current {
                Some(_) => Err(ServiceError::AlreadyInRoom),
                None => Ok(Change::Put(MemberEntity {
                    room: code.clone(),
                    connection,
                })),
            }
        })
        .await?
        .into_result()
        .map(|_| ())
}

/// Drop the pointer if it still names this room and connection.
async fn release_pointer(
    coordinator: &Coordinator,
    identity: &Identity,
    code: &RoomCode,
    connection: ConnectionId,
) {
    let released = coordinator
        .mutate(&keys::member(identity), |current: Option<MemberEntity>| {
            match current {
                Some(pointer) if pointer.room == *code && pointer.connection == connection => {
                    Ok(Change::Delete)
                }
                _ => Err(()),
            }
        })
        .await;
    if let Err(err) = released {
        warn!(participant = %identity, error = %err, "failed to release member pointer");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use futures::future::join_all;

    use super::*;
    use crate::{
        dto::ws::SubjectSettingsInput,
        state::{
            contest::{RoomMode, SubjectId, Visibility},
            test_support::{self, TestClient},
        },
    };

    pub(crate) fn create_request(title: &str, capacity: Option<u32>) -> CreateRoomRequest {
        CreateRoomRequest {
            title: title.into(),
            description: String::new(),
            mode: RoomMode::Standard,
            visibility: Visibility::Public,
            max_participants: capacity,
            round_time_limit_minutes: None,
        }
    }

    fn join_request(code: &RoomCode) -> RoomRequest {
        RoomRequest {
            code: code.to_string(),
        }
    }

    async fn room(state: &SharedState, code: &RoomCode) -> Option<RoomEntity> {
        let coordinator = state.coordinator().await.unwrap();
        coordinator.read(&keys::room(code)).await.unwrap()
    }

    async fn book(state: &SharedState, code: &RoomCode) -> ResponseBookEntity {
        let coordinator = state.coordinator().await.unwrap();
        coordinator
            .read(&keys::responses(code))
            .await
            .unwrap()
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn create_seeds_room_pointer_and_responses() {
        let state = test_support::state().await;
        let host = Identity::new("ada");
        let client = TestClient::connect(&state);

        let view = create_room(&state, &host, client.id, create_request("Friday", None))
            .await
            .unwrap();

        assert_eq!(view.host, host);
        assert_eq!(view.max_participants, 8);
        assert_eq!(view.round_time_limit_minutes, 60);
        assert_eq!(view.state, LifecycleState::Lobby);

        let coordinator = state.coordinator().await.unwrap();
        let pointer: MemberEntity = coordinator
            .read(&keys::member(&host))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pointer.room, view.code);
        assert_eq!(
            book(&state, &view.code).await.entries[&host].status,
            ResponseStatus::Unsubmitted
        );
    }

    #[tokio::test]
    async fn invalid_settings_are_rejected_before_any_write() {
        let state = test_support::state().await;
        let host = Identity::new("ada");
        let err = create_room(&state, &host, ConnectionId::new(), create_request("   ", Some(0)))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));

        let coordinator = state.coordinator().await.unwrap();
        let pointer: Option<MemberEntity> =
            coordinator.read(&keys::member(&host)).await.unwrap();
        assert!(pointer.is_none());
    }

    #[tokio::test]
    async fn second_room_for_same_identity_is_refused() {
        let state = test_support::state().await;
        let host = Identity::new("ada");
        let connection = ConnectionId::new();
        create_room(&state, &host, connection, create_request("One", None))
            .await
            .unwrap();

        let err = create_room(&state, &host, connection, create_request("Two", None))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyInRoom));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_joins_never_exceed_capacity() {
        let state = test_support::state().await;
        let host = Identity::new("host");
        let view = create_room(&state, &host, ConnectionId::new(), create_request("Cap", Some(3)))
            .await
            .unwrap();

        let attempts = (0..10).map(|n| {
            let state = Arc::clone(&state);
            let code = view.code.clone();
            tokio::spawn(async move {
                join_room(
                    &state,
                    &Identity::new(format!("p{n}")),
                    ConnectionId::new(),
                    join_request(&code),
                )
                .await
            })
        });
        let results: Vec<_> = join_all(attempts)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        let admitted = results.iter().filter(|result| result.is_ok()).count();
        assert_eq!(admitted, 2);
        assert!(
            results
                .iter()
                .filter_map(|result| result.as_ref().err())
                .all(|err| matches!(err, ServiceError::RoomFull(_)))
        );
        assert_eq!(room(&state, &view.code).await.unwrap().members.len(), 3);

        // Rejected joiners got their pointer back.
        let coordinator = state.coordinator().await.unwrap();
        let mut pointers = 0;
        for n in 0..10 {
            let pointer: Option<MemberEntity> = coordinator
                .read(&keys::member(&Identity::new(format!("p{n}"))))
                .await
                .unwrap();
            pointers += usize::from(pointer.is_some());
        }
        assert_eq!(pointers, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn interleaved_create_and_join_leave_one_membership() {
        for round in 0..20 {
            let state = test_support::state().await;
            let other = create_room(
                &state,
                &Identity::new("host"),
                ConnectionId::new(),
                create_request("Theirs", None),
            )
            .await
            .unwrap();

            let identity = Identity::new(format!("eve{round}"));
            let create = {
                let state = Arc::clone(&state);
                let identity = identity.clone();
                tokio::spawn(async move {
                    create_room(&state, &identity, ConnectionId::new(), create_request("Mine", None))
                        .await
                })
            };
            let join = {
                let state = Arc::clone(&state);
                let identity = identity.clone();
                let code = other.code.clone();
                tokio::spawn(async move {
                    join_room(&state, &identity, ConnectionId::new(), join_request(&code)).await
                })
            };
            let (create, join) = (create.await.unwrap(), join.await.unwrap());

            // A request dropped as a duplicate counts as not having succeeded.
            assert!(
                !(create.is_ok() && join.is_ok()),
                "create and join both claimed the identity"
            );
            for err in [create.as_ref().err(), join.as_ref().err()].into_iter().flatten() {
                assert!(
                    matches!(err, ServiceError::Duplicate | ServiceError::AlreadyInRoom),
                    "unexpected refusal: {err}"
                );
            }

            let joined = room(&state, &other.code).await.unwrap().has_member(&identity);
            assert_eq!(joined, join.is_ok());
            let created = match &create {
                Ok(view) => room(&state, &view.code).await.is_some(),
                Err(_) => false,
            };

            let coordinator = state.coordinator().await.unwrap();
            let pointer: Option<MemberEntity> =
                coordinator.read(&keys::member(&identity)).await.unwrap();
            match (&create, &join) {
                (Ok(view), _) => {
                    assert!(created);
                    assert_eq!(pointer.unwrap().room, view.code);
                }
                (_, Ok(_)) => assert_eq!(pointer.unwrap().room, other.code),
                _ => assert!(pointer.is_none()),
            }
        }
    }

    #[tokio::test]
    async fn duplicate_request_in_flight_is_dropped() {
        let state = test_support::state().await;
        let identity = Identity::new("eve");
        let _busy = state.in_flight().try_begin(&identity).unwrap();

        let err = create_room(&state, &identity, ConnectionId::new(), create_request("x", None))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Duplicate));
    }

    #[tokio::test]
    async fn join_unknown_room_is_not_found_and_releases_pointer() {
        let state = test_support::state().await;
        let identity = Identity::new("eve");
        let code = RoomCode::parse("ZZZZZZ").unwrap();

        let err = join_room(&state, &identity, ConnectionId::new(), join_request(&code))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::RoomNotFound(_)));

        let coordinator = state.coordinator().await.unwrap();
        let pointer: Option<MemberEntity> =
            coordinator.read(&keys::member(&identity)).await.unwrap();
        assert!(pointer.is_none());
    }

    #[tokio::test]
    async fn host_exit_hands_seat_to_earliest_member() {
        let state = test_support::state().await;
        let host = Identity::new("host");
        let view = create_room(&state, &host, ConnectionId::new(), create_request("Seat", None))
            .await
            .unwrap();
        let mut bob_client = TestClient::connect(&state);
        join_room(&state, &Identity::new("bob"), bob_client.id, join_request(&view.code))
            .await
            .unwrap();
        join_room(&state, &Identity::new("cy"), ConnectionId::new(), join_request(&view.code))
            .await
            .unwrap();
        bob_client.drain();

        let left = leave_room(&state, &host, Departure::Exit).await.unwrap();
        assert_eq!(left, Some(view.code.clone()));

        let current = room(&state, &view.code).await.unwrap();
        assert_eq!(current.host.identity, Identity::new("bob"));
        assert_eq!(current.host.connection, bob_client.id);

        let updates = bob_client.received("room-updated");
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0]["room"]["host"], "bob");

        assert_eq!(
            book(&state, &view.code).await.entries[&host].status,
            ResponseStatus::Disconnected
        );
    }

    #[tokio::test]
    async fn last_departure_destroys_room_records() {
        let state = test_support::state().await;
        let host = Identity::new("host");
        let view = create_room(&state, &host, ConnectionId::new(), create_request("Gone", None))
            .await
            .unwrap();

        leave_room(&state, &host, Departure::Exit).await.unwrap();

        assert!(room(&state, &view.code).await.is_none());
        let coordinator = state.coordinator().await.unwrap();
        for key in keys::room_scoped(&view.code) {
            let value: Option<serde_json::Value> = coordinator.read(&key).await.unwrap();
            assert!(value.is_none(), "{key} survived");
        }
        let pointer: Option<MemberEntity> = coordinator.read(&keys::member(&host)).await.unwrap();
        assert!(pointer.is_none());
    }

    #[tokio::test]
    async fn exit_without_room_is_reported() {
        let state = test_support::state().await;
        let err = leave_room(&state, &Identity::new("nobody"), Departure::Exit)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotInRoom));
    }

    #[tokio::test]
    async fn stale_connection_disconnect_keeps_seat() {
        let state = test_support::state().await;
        let host = Identity::new("host");
        let seat = ConnectionId::new();
        let view = create_room(&state, &host, seat, create_request("Seat", None))
            .await
            .unwrap();

        let left = leave_room(&state, &host, Departure::Disconnect(ConnectionId::new()))
            .await
            .unwrap();
        assert_eq!(left, None);
        assert!(room(&state, &view.code).await.unwrap().has_member(&host));

        let left = leave_room(&state, &host, Departure::Disconnect(seat))
            .await
            .unwrap();
        assert_eq!(left, Some(view.code));
    }

    #[tokio::test]
    async fn rejoin_after_disconnect_reactivates_response() {
        let state = test_support::state().await;
        let view = create_room(
            &state,
            &Identity::new("host"),
            ConnectionId::new(),
            create_request("Back", None),
        )
        .await
        .unwrap();
        let bob = Identity::new("bob");
        let first = ConnectionId::new();
        join_room(&state, &bob, first, join_request(&view.code))
            .await
            .unwrap();
        leave_room(&state, &bob, Departure::Disconnect(first))
            .await
            .unwrap();
        assert_eq!(
            book(&state, &view.code).await.entries[&bob].status,
            ResponseStatus::Disconnected
        );

        join_room(&state, &bob, ConnectionId::new(), join_request(&view.code))
            .await
            .unwrap();
        assert_eq!(
            book(&state, &view.code).await.entries[&bob].status,
            ResponseStatus::Unsubmitted
        );
    }

    fn aime_only(code: &RoomCode) -> ConfigureRoundRequest {
        ConfigureRoundRequest {
            code: code.to_string(),
            subjects: vec![SubjectSettingsInput {
                subject: SubjectId::new("aime"),
                selected: true,
                problem_count: 3,
                correct_score: 10.0,
                blank_score: 0.0,
            }],
            round_time_limit_minutes: Some(15),
        }
    }

    #[tokio::test]
    async fn configure_is_host_only() {
        let state = test_support::state().await;
        let host = Identity::new("host");
        let view = create_room(&state, &host, ConnectionId::new(), create_request("Cfg", None))
            .await
            .unwrap();
        let bob = Identity::new("bob");
        join_room(&state, &bob, ConnectionId::new(), join_request(&view.code))
            .await
            .unwrap();

        let err = configure_round(&state, &bob, aime_only(&view.code))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PermissionDenied(_)));

        configure_round(&state, &host, aime_only(&view.code))
            .await
            .unwrap();
        let coordinator = state.coordinator().await.unwrap();
        let contest: ContestConfigEntity = coordinator
            .read(&keys::settings(&view.code))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(contest.subjects.len(), 1);
        assert_eq!(contest.subjects["aime"].problem_count, 3);
        assert_eq!(
            room(&state, &view.code).await.unwrap().round_time_limit_minutes,
            15
        );
    }

    #[tokio::test]
    async fn configure_rejects_unknown_subjects() {
        let state = test_support::state().await;
        let host = Identity::new("host");
        let view = create_room(&state, &host, ConnectionId::new(), create_request("Cfg", None))
            .await
            .unwrap();
        let mut request = aime_only(&view.code);
        request.subjects[0].subject = SubjectId::new("olympiad");

        let err = configure_round(&state, &host, request).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }
}
