use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::models::{RoomEntity, keys},
    state::{
        contest::{EndReason, Identity, RoomCode},
        coordinator::{Change, Coordinator, CoordinatorError, Outcome},
    },
};

/// Phases a room cycles through; there is no backward edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Waiting for the host to start a round; settings can be changed.
    Lobby,
    /// The host started a round and problems are being fetched.
    Starting,
    /// Participants are answering; the round timer is running.
    Active,
    /// The round closed and standings are being computed.
    Compiling,
}

/// Events that can be applied to a room's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    /// Host asks to start a new round, identified by `round_id`.
    StartRequested { by: Identity, round_id: Uuid },
    /// Problems for the round have been stored.
    RoundMaterialized { round_id: Uuid },
    /// The timer fired or everyone submitted.
    RoundClosed { round_id: Uuid, reason: EndReason },
    /// Standings for the round have been stored.
    ResultsCompiled { round_id: Uuid },
}

impl RoomEvent {
    fn round_id(&self) -> Uuid {
        match self {
            RoomEvent::StartRequested { round_id, .. }
            | RoomEvent::RoundMaterialized { round_id }
            | RoomEvent::RoundClosed { round_id, .. }
            | RoomEvent::ResultsCompiled { round_id } => *round_id,
        }
    }
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    pub from: LifecycleState,
    pub event: RoomEvent,
}

/// Why an event was refused by a room.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    #[error("room no longer exists")]
    RoomMissing,
    #[error("only the host can start a round")]
    NotHost,
    #[error(transparent)]
    Invalid(#[from] InvalidTransition),
    #[error("event targets round {event} but the room is on {current:?}")]
    StaleRound { event: Uuid, current: Option<Uuid> },
}

/// Pure transition table.
pub fn compute_transition(
    from: LifecycleState,
    event: &RoomEvent,
) -> Result<LifecycleState, InvalidTransition> {
    let next = match (from, event) {
        (LifecycleState::Lobby, RoomEvent::StartRequested { .. }) => LifecycleState::Starting,
        (LifecycleState::Starting, RoomEvent::RoundMaterialized { .. }) => LifecycleState::Active,
        (LifecycleState::Active, RoomEvent::RoundClosed { .. }) => LifecycleState::Compiling,
        (LifecycleState::Compiling, RoomEvent::ResultsCompiled { .. }) => LifecycleState::Lobby,
        (from, event) => {
            return Err(InvalidTransition {
                from,
                event: event.clone(),
            });
        }
    };
    Ok(next)
}

/// Lifecycle view of a room at one version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub state: LifecycleState,
    pub version: u64,
    pub round_id: Option<Uuid>,
}

impl RoomEntity {
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.lifecycle,
            version: self.lifecycle_version,
            round_id: self.round_id,
        }
    }

    /// Check the guards for `event` and move the room to its next state.
    /// Returns the state the room was in before.
    pub fn apply_event(&mut self, event: &RoomEvent) -> Result<LifecycleState, GuardError> {
        if let RoomEvent::StartRequested { by, .. } = event {
            if !self.is_host(by) {
                return Err(GuardError::NotHost);
            }
        }

        let next = compute_transition(self.lifecycle, event)?;

        if !matches!(event, RoomEvent::StartRequested { .. })
            && self.round_id != Some(event.round_id())
        {
            return Err(GuardError::StaleRound {
                event: event.round_id(),
                current: self.round_id,
            });
        }

        let from = self.lifecycle;
        self.lifecycle = next;
        self.lifecycle_version += 1;
        match event {
            RoomEvent::StartRequested { round_id, .. } => self.round_id = Some(*round_id),
            RoomEvent::ResultsCompiled { .. } => self.round_id = None,
            _ => {}
        }
        Ok(from)
    }
}

/// Result of a guarded transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Applied {
        from: LifecycleState,
        to: LifecycleState,
        version: u64,
        room: Box<RoomEntity>,
    },
    /// The guard refused; nothing was written.
    Skipped(GuardError),
}

/// Runs lifecycle events as single guarded mutations of `rooms/{code}`.
#[derive(Clone)]
pub struct RoomStateMachine {
    coordinator: Coordinator,
}

impl RoomStateMachine {
    pub fn new(coordinator: Coordinator) -> Self {
        Self { coordinator }
    }

    pub async fn apply(
        &self,
        code: &RoomCode,
        event: RoomEvent,
    ) -> Result<Transition, CoordinatorError> {
        let mut from = None;
        let outcome = self
            .coordinator
            .mutate(&keys::room(code), |current: Option<RoomEntity>| {
                let mut room = current.ok_or(GuardError::RoomMissing)?;
                from = Some(room.apply_event(&event)?);
                Ok(Change::Put(room))
            })
            .await?;

        match (outcome, from) {
            (Outcome::Committed(Some(room)), Some(from)) => {
                let snapshot = room.snapshot();
                info!(
                    room = %code,
                    from = ?from,
                    to = ?snapshot.state,
                    version = snapshot.version,
                    round_id = ?snapshot.round_id,
                    "room transitioned"
                );
                Ok(Transition::Applied {
                    from,
                    to: snapshot.state,
                    version: snapshot.version,
                    room: Box::new(room),
                })
            }
            (Outcome::Aborted { reason, .. }, _) => {
                debug!(room = %code, event = ?event, reason = %reason, "transition skipped");
                Ok(Transition::Skipped(reason))
            }
            _ => Ok(Transition::Skipped(GuardError::RoomMissing)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use indexmap::IndexMap;

    use super::*;
    use crate::{
        dao::{kv_store::MemoryKvStore, models::SeatEntity},
        state::contest::{ConnectionId, RoomMode, Visibility},
    };

    fn room() -> RoomEntity {
        let connection = ConnectionId::new();
        let host = Identity::new("host");
        RoomEntity {
            code: RoomCode::parse("QWERTY").unwrap(),
            title: "Warmup".into(),
            description: String::new(),
            mode: RoomMode::Standard,
            visibility: Visibility::Private,
            max_participants: 8,
            round_time_limit_minutes: 60,
            host: SeatEntity {
                connection,
                identity: host.clone(),
            },
            members: IndexMap::from([(connection, host)]),
            lifecycle: LifecycleState::Lobby,
            lifecycle_version: 0,
            round_id: None,
            created_at_ms: 0,
        }
    }

    fn host() -> Identity {
        Identity::new("host")
    }

    #[test]
    fn full_cycle_returns_to_lobby() {
        let mut room = room();
        let round_id = Uuid::new_v4();

        let events = [
            RoomEvent::StartRequested {
                by: host(),
                round_id,
            },
            RoomEvent::RoundMaterialized { round_id },
            RoomEvent::RoundClosed {
                round_id,
                reason: EndReason::AllSubmitted,
            },
            RoomEvent::ResultsCompiled { round_id },
        ];
        let expected = [
            LifecycleState::Starting,
            LifecycleState::Active,
            LifecycleState::Compiling,
            LifecycleState::Lobby,
        ];

        for (event, state) in events.iter().zip(expected) {
            room.apply_event(event).unwrap();
            assert_eq!(room.lifecycle, state);
        }
        assert_eq!(room.lifecycle_version, 4);
        assert_eq!(room.round_id, None);
    }

    #[test]
    fn every_skipping_pair_is_rejected() {
        let round_id = Uuid::new_v4();
        let events = [
            RoomEvent::StartRequested {
                by: host(),
                round_id,
            },
            RoomEvent::RoundMaterialized { round_id },
            RoomEvent::RoundClosed {
                round_id,
                reason: EndReason::TimeLimit,
            },
            RoomEvent::ResultsCompiled { round_id },
        ];
        let states = [
            LifecycleState::Lobby,
            LifecycleState::Starting,
            LifecycleState::Active,
            LifecycleState::Compiling,
        ];

        for (i, from) in states.into_iter().enumerate() {
            for (j, event) in events.iter().enumerate() {
                let result = compute_transition(from, event);
                if i == j {
                    assert!(result.is_ok(), "{from:?} should accept {event:?}");
                } else {
                    let err = result.unwrap_err();
                    assert_eq!(err.from, from);
                    assert_eq!(&err.event, event);
                }
            }
        }
    }

    #[test]
    fn snapshot_tracks_version_and_round() {
        let mut room = room();
        let round_id = Uuid::new_v4();
        assert_eq!(
            room.snapshot(),
            Snapshot {
                state: LifecycleState::Lobby,
                version: 0,
                round_id: None,
            }
        );

        room.apply_event(&RoomEvent::StartRequested {
            by: host(),
            round_id,
        })
        .unwrap();
        assert_eq!(
            room.snapshot(),
            Snapshot {
                state: LifecycleState::Starting,
                version: 1,
                round_id: Some(round_id),
            }
        );
    }

    #[test]
    fn only_the_host_can_start() {
        let mut room = room();
        let err = room
            .apply_event(&RoomEvent::StartRequested {
                by: Identity::new("guest"),
                round_id: Uuid::new_v4(),
            })
            .unwrap_err();
        assert_eq!(err, GuardError::NotHost);
        assert_eq!(room.lifecycle, LifecycleState::Lobby);
    }

    #[test]
    fn stale_round_cannot_close_a_newer_one() {
        let mut room = room();
        let current = Uuid::new_v4();
        room.apply_event(&RoomEvent::StartRequested {
            by: host(),
            round_id: current,
        })
        .unwrap();
        room.apply_event(&RoomEvent::RoundMaterialized { round_id: current })
            .unwrap();

        let stale = Uuid::new_v4();
        let err = room
            .apply_event(&RoomEvent::RoundClosed {
                round_id: stale,
                reason: EndReason::TimeLimit,
            })
            .unwrap_err();
        assert_eq!(
            err,
            GuardError::StaleRound {
                event: stale,
                current: Some(current)
            }
        );
        assert_eq!(room.lifecycle, LifecycleState::Active);
    }

    #[tokio::test]
    async fn second_close_is_skipped() {
        let coordinator = Coordinator::new(Arc::new(MemoryKvStore::new()), 8);
        let mut seeded = room();
        let round_id = Uuid::new_v4();
        seeded.lifecycle = LifecycleState::Active;
        seeded.round_id = Some(round_id);
        let code = seeded.code.clone();
        coordinator
            .mutate::<RoomEntity, (), _>(&keys::room(&code), |_| Ok(Change::Put(seeded.clone())))
            .await
            .unwrap();

        let machine = RoomStateMachine::new(coordinator);
        let close = |reason| RoomEvent::RoundClosed { round_id, reason };

        let first = machine.apply(&code, close(EndReason::TimeLimit)).await.unwrap();
        let second = machine
            .apply(&code, close(EndReason::AllSubmitted))
            .await
            .unwrap();

        assert!(matches!(
            first,
            Transition::Applied {
                from: LifecycleState::Active,
                to: LifecycleState::Compiling,
                ..
            }
        ));
        assert!(matches!(
            second,
            Transition::Skipped(GuardError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn missing_room_is_skipped() {
        let machine = RoomStateMachine::new(Coordinator::new(Arc::new(MemoryKvStore::new()), 8));
        let code = RoomCode::parse("ZZZZZZ").unwrap();
        let outcome = machine
            .apply(
                &code,
                RoomEvent::ResultsCompiled {
                    round_id: Uuid::new_v4(),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, Transition::Skipped(GuardError::RoomMissing));
    }
}
