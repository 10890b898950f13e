//! Standings computation. Everything here is synchronous and side-effect free.

use std::collections::HashMap;

use crate::{
    config::AppConfig,
    dao::models::{
        ContestConfigEntity, ResponseBookEntity, ResponseStatus, RoundEntity, SolutionEntity,
        StandingEntity,
    },
    state::contest::SubjectId,
};

/// Points awarded per problem outcome.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scoring {
    pub correct: f64,
    pub blank: f64,
}

/// Used for subjects neither the room nor the catalog knows about.
const FALLBACK_SCORING: Scoring = Scoring {
    correct: 1.0,
    blank: 0.0,
};

/// Scoring per subject: room settings first, catalog defaults second.
#[derive(Debug, Clone, Default)]
pub struct ScoreTable {
    by_subject: HashMap<SubjectId, Scoring>,
}

impl ScoreTable {
    pub fn new(contest: &ContestConfigEntity, catalog: &AppConfig) -> Self {
        let defaults = catalog.subjects.iter().map(|(id, subject)| {
            (
                id.clone(),
                Scoring {
                    correct: subject.correct_score,
                    blank: subject.blank_score,
                },
            )
        });
        let configured = contest.subjects.iter().map(|(id, settings)| {
            (
                id.clone(),
                Scoring {
                    correct: settings.correct_score,
                    blank: settings.blank_score,
                },
            )
        });

        Self {
            by_subject: defaults.chain(configured).collect(),
        }
    }

    pub fn for_subject(&self, subject: &SubjectId) -> Scoring {
        self.by_subject
            .get(subject)
            .copied()
            .unwrap_or(FALLBACK_SCORING)
    }
}

/// Stamp the deadline on everyone who never submitted.
pub fn impute_finish(book: &mut ResponseBookEntity, round: &RoundEntity) {
    let deadline = round.deadline_ms();
    for entry in book.entries.values_mut() {
        match entry.status {
            ResponseStatus::Unsubmitted => {
                entry.status = ResponseStatus::Submitted;
                entry.finished_at_ms = Some(deadline);
            }
            ResponseStatus::Submitted if entry.finished_at_ms.is_none() => {
                entry.finished_at_ms = Some(deadline);
            }
            _ => {}
        }
    }
}

/// Rank every participant still in the room: score descending, then time used ascending.
///
/// Departed participants are left out. Ties on both keys keep join order.
pub fn compute_standings(
    book: &ResponseBookEntity,
    round: &RoundEntity,
    solutions: &[SolutionEntity],
    table: &ScoreTable,
) -> Vec<StandingEntity> {
    let mut standings: Vec<StandingEntity> = book
        .entries
        .iter()
        .filter(|(_, entry)| entry.status != ResponseStatus::Disconnected)
        .map(|(participant, entry)| {
            let mut standing = StandingEntity {
                participant: participant.clone(),
                correct: 0,
                blank: 0,
                score: 0.0,
                time_used_ms: entry
                    .finished_at_ms
                    .unwrap_or_else(|| round.deadline_ms())
                    .saturating_sub(round.started_at_ms),
            };

            for (index, solution) in solutions.iter().enumerate() {
                let scoring = table.for_subject(&solution.subject);
                match entry.answer(index) {
                    None => {
                        standing.blank += 1;
                        standing.score += scoring.blank;
                    }
                    Some(response) if solution.answer.accepts(response) => {
                        standing.correct += 1;
                        standing.score += scoring.correct;
                    }
                    Some(_) => {}
                }
            }
            standing
        })
        .collect();

    standings.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(a.time_used_ms.cmp(&b.time_used_ms))
    });
    standings
}
