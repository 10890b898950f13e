//! Round lifecycle: start, answers, submission, closing and scoring.
//!
//! A round can be closed by its timer or by the last outstanding submission. Both race on
//! the same guarded `active -> compiling` transition and only the winner compiles results,
//! so cancelling the timer is an optimization and never needed for correctness.

use std::{convert::Infallible, time::Duration};

use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{
        ContestConfigEntity, PublicProblemEntity, ResponseBookEntity, ResponseEntity,
        ResponseStatus, RoomEntity, RoundEntity, RoundResultsEntity, SolutionEntity,
        SolutionSetEntity, keys,
    },
    dto::{
        room::{ResultsView, RoundView},
        ws::{OutboundMessage, RecordAnswerRequest, RoomRequest},
    },
    error::ServiceError,
    services::{
        broadcast,
        problem_generator::{GeneratedProblem, sort_easiest_first},
        scoring::{ScoreTable, compute_standings, impute_finish},
    },
    state::{
        SharedState,
        contest::{AnswerKind, EndReason, Identity, RoomCode, now_ms},
        coordinator::{Change, Coordinator, Outcome},
        lifecycle::{GuardError, LifecycleState, RoomEvent, Transition},
    },
};

/// Attempts at storing a round or its results before falling back.
const PUBLISH_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(250);

/// Start a round in the caller's room. Returns the number of problems in the round, or
/// `None` when a concurrent start got there first.
pub async fn start_round(
    state: &SharedState,
    identity: &Identity,
    request: RoomRequest,
) -> Result<Option<usize>, ServiceError> {
    request.validate()?;
    let code = request.room_code()?;
    let lifecycle = state.lifecycle().await?;
    let round_id = Uuid::new_v4();

    let room = match lifecycle
        .apply(
            &code,
            RoomEvent::StartRequested {
                by: identity.clone(),
                round_id,
            },
        )
        .await?
    {
        Transition::Applied { room, .. } => room,
        Transition::Skipped(GuardError::NotHost) => {
            return Err(ServiceError::PermissionDenied(
                "only the host can start a round".into(),
            ));
        }
        Transition::Skipped(GuardError::RoomMissing) => {
            return Err(ServiceError::RoomNotFound(code));
        }
        Transition::Skipped(reason) => {
            debug!(room = %code, reason = %reason, "start ignored");
            return Ok(None);
        }
    };

    broadcast::to_room(
        state,
        &room,
        &OutboundMessage::StartingGame { code: code.clone() },
    );

    match materialize_round(state, &room, round_id).await {
        Ok(problems) => Ok(Some(problems)),
        Err(err @ ServiceError::RoomNotFound(_)) => {
            debug!(room = %code, %round_id, "room emptied while the round was starting");
            Err(err)
        }
        Err(err) => {
            error!(room = %code, %round_id, error = %err, "round failed to start");
            Err(err)
        }
    }
}

/// Fetch problems and open the round. Storing the batch is retried; the last attempt
/// opens the round without problems so the room always reaches `active`.
async fn materialize_round(
    state: &SharedState,
    room: &RoomEntity,
    round_id: Uuid,
) -> Result<usize, ServiceError> {
    let code = &room.code;
    let contest = load_contest(state, code).await;

    let mut problems = state.generator().generate(&contest).await.problems;
    sort_easiest_first(&mut problems);

    let mut attempt = 1;
    loop {
        let batch = if attempt < PUBLISH_ATTEMPTS {
            problems.clone()
        } else {
            Vec::new()
        };
        match publish_round(state, code, round_id, room.round_time_limit_ms(), batch).await {
            Ok(count) => return Ok(count),
            Err(err @ ServiceError::RoomNotFound(_)) => return Err(err),
            Err(err) if attempt < PUBLISH_ATTEMPTS => {
                warn!(room = %code, %round_id, attempt, error = %err, "opening round failed; retrying");
                sleep(RETRY_DELAY).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn load_contest(state: &SharedState, code: &RoomCode) -> ContestConfigEntity {
    let stored = match state.coordinator().await {
        Ok(coordinator) => coordinator
            .read::<ContestConfigEntity>(&keys::settings(code))
            .await
            .map_err(ServiceError::from),
        Err(err) => Err(err),
    };
    match stored {
        Ok(Some(contest)) => contest,
        Ok(None) => state.config().default_contest(),
        Err(err) => {
            warn!(room = %code, error = %err, "round settings unreadable; using defaults");
            state.config().default_contest()
        }
    }
}

/// Store `problems` as round `round_id` and move the room to `active`.
async fn publish_round(
    state: &SharedState,
    code: &RoomCode,
    round_id: Uuid,
    time_limit_ms: u64,
    problems: Vec<GeneratedProblem>,
) -> Result<usize, ServiceError> {
    let coordinator = state.coordinator().await?;

    // The book only goes away with the room; never bring it back.
    let reset = coordinator
        .mutate(
            &keys::responses(code),
            |current: Option<ResponseBookEntity>| {
                let mut book = current.ok_or(())?;
                book.reset_for_round();
                Ok::<_, ()>(Change::Put(book))
            },
        )
        .await?;
    if !reset.is_committed() {
        return Err(ServiceError::RoomNotFound(code.clone()));
    }

    let (public, solutions): (Vec<_>, Vec<_>) = problems
        .into_iter()
        .map(|problem| {
            (
                PublicProblemEntity {
                    subject: problem.subject.clone(),
                    body: problem.body,
                    answer_kind: problem.answer_kind,
                },
                SolutionEntity {
                    subject: problem.subject,
                    title: problem.title,
                    reference: problem.reference,
                    answer: problem.answer,
                    difficulty: problem.difficulty,
                },
            )
        })
        .unzip();

    if !solutions.is_empty() {
        coordinator
            .put(
                &keys::solutions(code),
                SolutionSetEntity {
                    round_id,
                    solutions,
                },
            )
            .await?;
    }

    let round = RoundEntity {
        round_id,
        started_at_ms: now_ms(),
        time_limit_ms,
        problems: public,
    };
    coordinator.put(&keys::round(code), round.clone()).await?;

    let lifecycle = state.lifecycle().await?;
    let room = match lifecycle
        .apply(code, RoomEvent::RoundMaterialized { round_id })
        .await?
    {
        Transition::Applied { room, .. } => room,
        Transition::Skipped(GuardError::RoomMissing) => {
            discard_round(&coordinator, code, round_id).await;
            return Err(ServiceError::RoomNotFound(code.clone()));
        }
        Transition::Skipped(reason) => {
            debug!(room = %code, reason = %reason, "round opened on a room that moved on");
            return Ok(round.problems.len());
        }
    };

    arm_timer(state, code, round_id, Duration::from_millis(round.time_limit_ms));
    info!(
        room = %code,
        %round_id,
        problems = round.problems.len(),
        time_limit_ms = round.time_limit_ms,
        "round started"
    );
    broadcast::to_room(
        state,
        &room,
        &OutboundMessage::StartedGame {
            code: code.clone(),
            round: RoundView::from(&round),
        },
    );
    Ok(round.problems.len())
}

/// Remove the records of `round_id` written for a room that was destroyed meanwhile.
async fn discard_round(coordinator: &Coordinator, code: &RoomCode, round_id: Uuid) {
    let round = coordinator
        .mutate(&keys::round(code), |current: Option<RoundEntity>| match current {
            Some(round) if round.round_id == round_id => Ok(Change::Delete),
            _ => Err(()),
        })
        .await;
    let solutions = coordinator
        .mutate(
            &keys::solutions(code),
            |current: Option<SolutionSetEntity>| match current {
                Some(set) if set.round_id == round_id => Ok(Change::Delete),
                _ => Err(()),
            },
        )
        .await;
    let responses = coordinator.remove(&keys::responses(code)).await;
    for failed in [round.err(), solutions.err(), responses.err()].into_iter().flatten() {
        warn!(room = %code, %round_id, error = %failed, "failed to discard round records");
    }
}

/// Schedule the time-limit close of `round_id`.
fn arm_timer(state: &SharedState, code: &RoomCode, round_id: Uuid, limit: Duration) {
    let task_state = state.clone();
    let task_code = code.clone();
    let timer = tokio::spawn(async move {
        tokio::time::sleep(limit).await;
        task_state.round_timers().disarm(&task_code, round_id);
        // Detached so that a late cancel cannot abort the close halfway through.
        tokio::spawn(async move {
            let closed = close_round(&task_state, &task_code, round_id, EndReason::TimeLimit);
            if let Err(err) = closed.await {
                error!(room = %task_code, %round_id, error = %err, "timed close failed");
            }
        });
    });
    state
        .round_timers()
        .arm(code.clone(), round_id, timer.abort_handle());
}

/// Store the caller's answer to one problem. Returns `false` when the round is not open
/// for the caller anymore.
pub async fn record_answer(
    state: &SharedState,
    identity: &Identity,
    request: RecordAnswerRequest,
) -> Result<bool, ServiceError> {
    request.validate()?;
    let code = request.room_code()?;
    let coordinator = state.coordinator().await?;

    let Some(round) = open_round(&coordinator, &code, identity).await? else {
        return Ok(false);
    };
    let Some(problem) = round.problems.get(request.index) else {
        return Err(ServiceError::InvalidInput(format!(
            "problem index {} out of range (round has {})",
            request.index,
            round.problems.len()
        )));
    };
    let answer = match problem.answer_kind {
        AnswerKind::Integer => request.answer.map(|answer| answer.normalize_integer()),
        AnswerKind::MultipleChoice => request.answer,
    };

    let outcome = coordinator
        .mutate(
            &keys::responses(&code),
            |current: Option<ResponseBookEntity>| {
                let mut book = current.ok_or(())?;
                let entry = book.entries.get_mut(identity).ok_or(())?;
                if entry.status != ResponseStatus::Unsubmitted {
                    return Err(());
                }
                if entry.answers.len() <= request.index {
                    entry.answers.resize(request.index + 1, None);
                }
                entry.answers[request.index] = answer.clone();
                Ok(Change::Put(book))
            },
        )
        .await?;
    Ok(outcome.is_committed())
}

/// Mark the caller done. Returns whether this call changed anything.
pub async fn submit(
    state: &SharedState,
    identity: &Identity,
    request: RoomRequest,
) -> Result<bool, ServiceError> {
    request.validate()?;
    let code = request.room_code()?;
    let coordinator = state.coordinator().await?;

    let Some(round) = open_round(&coordinator, &code, identity).await? else {
        return Ok(false);
    };
    let finished_at = now_ms();

    let outcome = coordinator
        .mutate(
            &keys::responses(&code),
            |current: Option<ResponseBookEntity>| {
                let mut book = current.ok_or(())?;
                let entry = book.entries.get_mut(identity).ok_or(())?;
                if entry.status != ResponseStatus::Unsubmitted {
                    return Err(());
                }
                entry.status = ResponseStatus::Submitted;
                entry.finished_at_ms = Some(finished_at);
                Ok(Change::Put(book))
            },
        )
        .await?;

    let Outcome::Committed(Some(book)) = outcome else {
        debug!(room = %code, participant = %identity, "submit changed nothing");
        return Ok(false);
    };
    debug!(room = %code, participant = %identity, "submitted");
    finish_if_settled(state, &code, round.round_id, &book).await?;
    Ok(true)
}

/// The round `identity` may currently play in `code`, if any.
async fn open_round(
    coordinator: &Coordinator,
    code: &RoomCode,
    identity: &Identity,
) -> Result<Option<RoundEntity>, ServiceError> {
    let room: RoomEntity = coordinator
        .read(&keys::room(code))
        .await?
        .ok_or_else(|| ServiceError::RoomNotFound(code.clone()))?;
    if !room.has_member(identity) {
        return Err(ServiceError::NotInRoom);
    }
    if room.lifecycle != LifecycleState::Active {
        return Ok(None);
    }

    let round: Option<RoundEntity> = coordinator.read(&keys::round(code)).await?;
    Ok(round.filter(|round| Some(round.round_id) == room.round_id))
}

/// Close `round_id` early when `book` (a committed response set) has nobody left working.
pub(crate) async fn finish_if_settled(
    state: &SharedState,
    code: &RoomCode,
    round_id: Uuid,
    book: &ResponseBookEntity,
) -> Result<(), ServiceError> {
    if !book.all_settled() {
        return Ok(());
    }
    if state.round_timers().cancel(code, round_id) {
        debug!(room = %code, %round_id, "round timer cancelled");
    }
    close_round(state, code, round_id, EndReason::AllSubmitted).await?;
    Ok(())
}

/// Try to close `round_id`; the first caller wins and compiles results. Returns whether
/// this call was the one that closed the round.
pub async fn close_round(
    state: &SharedState,
    code: &RoomCode,
    round_id: Uuid,
    reason: EndReason,
) -> Result<bool, ServiceError> {
    let lifecycle = state.lifecycle().await?;
    match lifecycle
        .apply(code, RoomEvent::RoundClosed { round_id, reason })
        .await?
    {
        Transition::Applied { .. } => {}
        Transition::Skipped(guard) => {
            debug!(room = %code, %round_id, reason = ?reason, guard = %guard, "close lost the race");
            return Ok(false);
        }
    }

    info!(room = %code, %round_id, reason = ?reason, "round closed");

    // The close is won; from here the room must get back to the lobby.
    let mut attempt = 1;
    loop {
        match compile_results(state, code, round_id, reason).await {
            Ok(()) => return Ok(true),
            Err(err) if attempt < PUBLISH_ATTEMPTS => {
                warn!(room = %code, %round_id, attempt, error = %err, "compiling results failed; retrying");
                sleep(RETRY_DELAY).await;
                attempt += 1;
            }
            Err(err) => {
                error!(room = %code, %round_id, error = %err, "results lost; reopening the lobby without them");
                let empty = RoundResultsEntity {
                    round_id,
                    end_reason: reason,
                    compiled_at_ms: now_ms(),
                    standings: Vec::new(),
                    solutions: Vec::new(),
                };
                finish_round(state, code, empty).await?;
                return Ok(true);
            }
        }
    }
}

/// Score the closed round, store the results and return the room to the lobby.
///
/// Safe to repeat: results already stored for `round_id` are reused.
async fn compile_results(
    state: &SharedState,
    code: &RoomCode,
    round_id: Uuid,
    reason: EndReason,
) -> Result<(), ServiceError> {
    let coordinator = state.coordinator().await?;

    let stored: Option<RoundResultsEntity> = coordinator.read(&keys::results(code)).await?;
    let results = match stored {
        Some(results) if results.round_id == round_id => results,
        _ => {
            let results = score_round(state, &coordinator, code, round_id, reason).await?;
            coordinator.put(&keys::results(code), results.clone()).await?;
            results
        }
    };

    finish_round(state, code, results).await
}

async fn score_round(
    state: &SharedState,
    coordinator: &Coordinator,
    code: &RoomCode,
    round_id: Uuid,
    reason: EndReason,
) -> Result<RoundResultsEntity, ServiceError> {
    let round: Option<RoundEntity> = coordinator.read(&keys::round(code)).await?;
    let solutions: Option<SolutionSetEntity> = coordinator.read(&keys::solutions(code)).await?;
    let (round, solutions) = match (round, solutions) {
        (Some(round), Some(set)) if round.round_id == round_id && set.round_id == round_id => {
            (round, set.solutions)
        }
        // A round opened without problems has no solution set.
        (Some(round), None) if round.round_id == round_id && round.problems.is_empty() => {
            (round, Vec::new())
        }
        _ => {
            warn!(room = %code, %round_id, "round records missing; compiling empty results");
            let round = RoundEntity {
                round_id,
                started_at_ms: now_ms(),
                time_limit_ms: 0,
                problems: Vec::new(),
            };
            (round, Vec::new())
        }
    };

    let contest: ContestConfigEntity = coordinator
        .read(&keys::settings(code))
        .await?
        .unwrap_or_default();
    let table = ScoreTable::new(&contest, state.config());

    let outcome = coordinator
        .mutate(
            &keys::responses(code),
            |current: Option<ResponseBookEntity>| {
                let mut book = current.unwrap_or_default();
                impute_finish(&mut book, &round);
                Ok::<_, Infallible>(Change::Put(book))
            },
        )
        .await?;
    let book = match outcome {
        Outcome::Committed(Some(book)) => book,
        _ => ResponseBookEntity::default(),
    };

    Ok(RoundResultsEntity {
        round_id,
        end_reason: reason,
        compiled_at_ms: now_ms(),
        standings: compute_standings(&book, &round, &solutions, &table),
        solutions,
    })
}

/// Drop the round records, reopen the lobby and announce `results`.
async fn finish_round(
    state: &SharedState,
    code: &RoomCode,
    results: RoundResultsEntity,
) -> Result<(), ServiceError> {
    let round_id = results.round_id;
    let coordinator = state.coordinator().await?;
    // Leftovers are harmless: every reader matches them against the room's round id.
    for key in [keys::round(code), keys::solutions(code)] {
        if let Err(err) = coordinator.remove(&key).await {
            warn!(room = %code, %round_id, key, error = %err, "failed to drop round record");
        }
    }

    let lifecycle = state.lifecycle().await?;
    match lifecycle
        .apply(code, RoomEvent::ResultsCompiled { round_id })
        .await?
    {
        Transition::Applied { room, .. } => {
            info!(
                room = %code,
                %round_id,
                participants = results.standings.len(),
                "results compiled"
            );
            broadcast::to_room(
                state,
                &room,
                &OutboundMessage::ResultsCompiled {
                    code: code.clone(),
                    results: ResultsView::from(&results),
                },
            );
        }
        Transition::Skipped(guard) => {
            debug!(room = %code, %round_id, guard = %guard, "results compiled for a room that moved on");
        }
    }
    Ok(())
}
