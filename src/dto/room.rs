//! Read projections of rooms, rounds and results. Canonical answers only ever appear in
//! [`ResultsView`], after the round is over.

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::models::{RoomEntity, RoundEntity, RoundResultsEntity, SolutionEntity, StandingEntity},
    dto::format_epoch_ms,
    state::{
        contest::{AnswerKind, CanonicalAnswer, EndReason, Identity, RoomCode, RoomMode, SubjectId, Visibility},
        lifecycle::LifecycleState,
    },
};

/// Public view of a room.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoomView {
    pub code: RoomCode,
    pub title: String,
    pub description: String,
    pub mode: RoomMode,
    pub visibility: Visibility,
    pub max_participants: u32,
    pub round_time_limit_minutes: u32,
    pub host: Identity,
    /// Participants in join order.
    pub participants: Vec<Identity>,
    pub state: LifecycleState,
}

impl From<&RoomEntity> for RoomView {
    fn from(room: &RoomEntity) -> Self {
        Self {
            code: room.code.clone(),
            title: room.title.clone(),
            description: room.description.clone(),
            mode: room.mode,
            visibility: room.visibility,
            max_participants: room.max_participants,
            round_time_limit_minutes: room.round_time_limit_minutes,
            host: room.host.identity.clone(),
            participants: room.members.values().cloned().collect(),
            state: room.lifecycle,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProblemView {
    pub index: usize,
    pub subject: SubjectId,
    /// Sanitized markup.
    pub body: String,
    pub answer_kind: AnswerKind,
}

/// The round being played, without answers.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoundView {
    pub round_id: Uuid,
    /// RFC 3339 start time.
    pub started_at: String,
    pub started_at_ms: u64,
    pub time_limit_ms: u64,
    pub problems: Vec<ProblemView>,
}

impl From<&RoundEntity> for RoundView {
    fn from(round: &RoundEntity) -> Self {
        Self {
            round_id: round.round_id,
            started_at: format_epoch_ms(round.started_at_ms),
            started_at_ms: round.started_at_ms,
            time_limit_ms: round.time_limit_ms,
            problems: round
                .problems
                .iter()
                .enumerate()
                .map(|(index, problem)| ProblemView {
                    index,
                    subject: problem.subject.clone(),
                    body: problem.body.clone(),
                    answer_kind: problem.answer_kind,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StandingView {
    /// 1-based position.
    pub rank: usize,
    pub participant: Identity,
    pub correct: u32,
    pub blank: u32,
    pub score: f64,
    pub time_used_ms: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SolutionView {
    pub index: usize,
    pub subject: SubjectId,
    pub title: String,
    pub answer: CanonicalAnswer,
}

/// Standings and revealed answers of the latest round.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ResultsView {
    pub round_id: Uuid,
    pub end_reason: EndReason,
    /// RFC 3339 compilation time.
    pub compiled_at: String,
    pub standings: Vec<StandingView>,
    pub solutions: Vec<SolutionView>,
}

impl From<&RoundResultsEntity> for ResultsView {
    fn from(results: &RoundResultsEntity) -> Self {
        Self {
            round_id: results.round_id,
            end_reason: results.end_reason,
            compiled_at: format_epoch_ms(results.compiled_at_ms),
            standings: results
                .standings
                .iter()
                .enumerate()
                .map(|(position, standing)| standing_view(position + 1, standing))
                .collect(),
            solutions: results
                .solutions
                .iter()
                .enumerate()
                .map(|(index, solution)| solution_view(index, solution))
                .collect(),
        }
    }
}

fn standing_view(rank: usize, standing: &StandingEntity) -> StandingView {
    StandingView {
        rank,
        participant: standing.participant.clone(),
        correct: standing.correct,
        blank: standing.blank,
        score: standing.score,
        time_used_ms: standing.time_used_ms,
    }
}

fn solution_view(index: usize, solution: &SolutionEntity) -> SolutionView {
    SolutionView {
        index,
        subject: solution.subject.clone(),
        title: solution.title.clone(),
        answer: solution.answer.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::PublicProblemEntity;

    #[test]
    fn round_view_never_carries_answers() {
        let round = RoundEntity {
            round_id: Uuid::new_v4(),
            started_at_ms: 0,
            time_limit_ms: 60_000,
            problems: vec![PublicProblemEntity {
                subject: SubjectId::new("aime"),
                body: "<p>Find n.</p>".into(),
                answer_kind: AnswerKind::Integer,
            }],
        };

        let json = serde_json::to_value(RoundView::from(&round)).unwrap();

        assert_eq!(json["started_at"], "1970-01-01T00:00:00Z");
        assert_eq!(json["problems"][0]["index"], 0);
        assert_eq!(json["problems"][0]["answer_kind"], "integer");
        assert!(json["problems"][0].get("answer").is_none());
    }

    #[test]
    fn standings_are_ranked_in_order() {
        let standing = |name: &str, score| StandingEntity {
            participant: Identity::new(name),
            correct: 0,
            blank: 0,
            score,
            time_used_ms: 0,
        };
        let results = RoundResultsEntity {
            round_id: Uuid::new_v4(),
            end_reason: EndReason::TimeLimit,
            compiled_at_ms: 0,
            standings: vec![standing("ada", 12.0), standing("bob", 6.0)],
            solutions: Vec::new(),
        };

        let view = ResultsView::from(&results);

        assert_eq!(view.standings[0].rank, 1);
        assert_eq!(view.standings[1].participant, Identity::new("bob"));
        assert_eq!(view.standings[1].rank, 2);
    }
}
