//! Persisted records. Each record lives under its own key and is mutated on its own;
//! records reference each other by room code or identity only.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::{
    contest::{
        AnswerKind, CanonicalAnswer, ConnectionId, EndReason, Identity, RoomCode, RoomMode, Scalar,
        SubjectId, Visibility,
    },
    lifecycle::LifecycleState,
};

/// Key builders for every record kind.
pub mod keys {
    use crate::state::contest::{Identity, RoomCode};

    pub fn room(code: &RoomCode) -> String {
        format!("rooms/{code}")
    }

    pub fn member(identity: &Identity) -> String {
        format!("members/{identity}")
    }

    pub fn settings(code: &RoomCode) -> String {
        format!("settings/{code}")
    }

    pub fn round(code: &RoomCode) -> String {
        format!("rounds/{code}")
    }

    pub fn solutions(code: &RoomCode) -> String {
        format!("solutions/{code}")
    }

    pub fn responses(code: &RoomCode) -> String {
        format!("responses/{code}")
    }

    pub fn results(code: &RoomCode) -> String {
        format!("results/{code}")
    }

    /// Every key scoped to a room except the room itself.
    pub fn room_scoped(code: &RoomCode) -> [String; 5] {
        [
            settings(code),
            round(code),
            solutions(code),
            responses(code),
            results(code),
        ]
    }
}

/// Connection and identity currently holding the host seat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatEntity {
    pub connection: ConnectionId,
    pub identity: Identity,
}

/// Room metadata, membership and lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomEntity {
    pub code: RoomCode,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub mode: RoomMode,
    pub visibility: Visibility,
    pub max_participants: u32,
    pub round_time_limit_minutes: u32,
    pub host: SeatEntity,
    /// Members in join order, keyed by the connection that joined.
    pub members: IndexMap<ConnectionId, Identity>,
    pub lifecycle: LifecycleState,
    pub lifecycle_version: u64,
    /// Round currently being started, played or compiled.
    #[serde(default)]
    pub round_id: Option<Uuid>,
    pub created_at_ms: u64,
}

impl RoomEntity {
    pub fn is_host(&self, identity: &Identity) -> bool {
        &self.host.identity == identity
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.max_participants as usize
    }

    /// Connection through which `identity` is a member, if any.
    pub fn connection_of(&self, identity: &Identity) -> Option<ConnectionId> {
        self.members
            .iter()
            .find(|(_, member)| *member == identity)
            .map(|(connection, _)| *connection)
    }

    pub fn has_member(&self, identity: &Identity) -> bool {
        self.connection_of(identity).is_some()
    }

    /// Remove `identity` from the room and hand the host seat to the earliest remaining
    /// member when needed. Returns `false` when the identity was not a member.
    pub fn remove_member(&mut self, identity: &Identity) -> bool {
        let Some(connection) = self.connection_of(identity) else {
            return false;
        };
        self.members.shift_remove(&connection);

        if self.is_host(identity) {
            if let Some((next_connection, next_identity)) = self.members.first() {
                self.host = SeatEntity {
                    connection: *next_connection,
                    identity: next_identity.clone(),
                };
            }
        }
        true
    }

    pub fn round_time_limit_ms(&self) -> u64 {
        u64::from(self.round_time_limit_minutes) * 60_000
    }
}

/// Global pointer binding an identity to the one room it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberEntity {
    pub room: RoomCode,
    pub connection: ConnectionId,
}

/// Selection and scoring of one subject for a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectSettingsEntity {
    pub selected: bool,
    pub problem_count: u32,
    pub correct_score: f64,
    pub blank_score: f64,
}

/// Per-room contest configuration, in subject display order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContestConfigEntity {
    pub subjects: IndexMap<SubjectId, SubjectSettingsEntity>,
}

impl ContestConfigEntity {
    /// Subjects that will contribute problems to the next round.
    pub fn selected(&self) -> impl Iterator<Item = (&SubjectId, &SubjectSettingsEntity)> {
        self.subjects
            .iter()
            .filter(|(_, settings)| settings.selected && settings.problem_count > 0)
    }
}

/// Problem as shown to participants: no title, no answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicProblemEntity {
    pub subject: SubjectId,
    pub body: String,
    pub answer_kind: AnswerKind,
}

/// The round being played in a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundEntity {
    pub round_id: Uuid,
    pub started_at_ms: u64,
    pub time_limit_ms: u64,
    pub problems: Vec<PublicProblemEntity>,
}

impl RoundEntity {
    pub fn deadline_ms(&self) -> u64 {
        self.started_at_ms + self.time_limit_ms
    }
}

/// Withheld half of a problem, aligned by index with [`RoundEntity::problems`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionEntity {
    pub subject: SubjectId,
    pub title: String,
    pub reference: String,
    pub answer: CanonicalAnswer,
    pub difficulty: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionSetEntity {
    pub round_id: Uuid,
    pub solutions: Vec<SolutionEntity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Unsubmitted,
    Submitted,
    Disconnected,
}

/// One participant's answers for the current round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEntity {
    pub status: ResponseStatus,
    /// `None` marks a blank; the list may be shorter than the problem list.
    #[serde(default)]
    pub answers: Vec<Option<Scalar>>,
    #[serde(default)]
    pub finished_at_ms: Option<u64>,
}

impl ResponseEntity {
    pub fn fresh() -> Self {
        Self {
            status: ResponseStatus::Unsubmitted,
            answers: Vec::new(),
            finished_at_ms: None,
        }
    }

    /// Answer given to problem `index`, blank when never recorded.
    pub fn answer(&self, index: usize) -> Option<&Scalar> {
        self.answers.get(index).and_then(Option::as_ref)
    }
}

/// All responses of a room, keyed by identity in join order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseBookEntity {
    pub entries: IndexMap<Identity, ResponseEntity>,
}

impl ResponseBookEntity {
    /// Whether nobody is still working on the round.
    pub fn all_settled(&self) -> bool {
        self.entries
            .values()
            .all(|entry| entry.status != ResponseStatus::Unsubmitted)
    }

    /// Fresh unsubmitted entries for everyone still present; departed entries are dropped.
    pub fn reset_for_round(&mut self) {
        self.entries
            .retain(|_, entry| entry.status != ResponseStatus::Disconnected);
        for entry in self.entries.values_mut() {
            *entry = ResponseEntity::fresh();
        }
    }
}

/// Ranked result of one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandingEntity {
    pub participant: Identity,
    pub correct: u32,
    pub blank: u32,
    pub score: f64,
    pub time_used_ms: u64,
}

/// Outcome of the latest compiled round of a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundResultsEntity {
    pub round_id: Uuid,
    pub end_reason: EndReason,
    pub compiled_at_ms: u64,
    pub standings: Vec<StandingEntity>,
    pub solutions: Vec<SolutionEntity>,
}
