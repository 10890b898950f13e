//! Read-only projections of a room for HTTP clients.

use crate::{
    dao::models::{RoomEntity, RoundEntity, RoundResultsEntity, keys},
    dto::room::{ResultsView, RoomView, RoundView},
    error::ServiceError,
    state::{SharedState, contest::RoomCode},
};

fn parse_code(code: &str) -> Result<RoomCode, ServiceError> {
    RoomCode::parse(code).ok_or_else(|| ServiceError::InvalidInput(format!("bad room code `{code}`")))
}

/// Return the public view of a room.
pub async fn get_room(state: &SharedState, code: &str) -> Result<RoomView, ServiceError> {
    let code = parse_code(code)?;
    let coordinator = state.coordinator().await?;
    let room: RoomEntity = coordinator
        .read(&keys::room(&code))
        .await?
        .ok_or(ServiceError::RoomNotFound(code))?;
    Ok(RoomView::from(&room))
}

/// Return the round being played, without answers.
pub async fn get_round(state: &SharedState, code: &str) -> Result<RoundView, ServiceError> {
    let code = parse_code(code)?;
    let coordinator = state.coordinator().await?;
    let room: RoomEntity = coordinator
        .read(&keys::room(&code))
        .await?
        .ok_or_else(|| ServiceError::RoomNotFound(code.clone()))?;
    let round: RoundEntity = coordinator
        .read::<RoundEntity>(&keys::round(&code))
        .await?
        .filter(|round| Some(round.round_id) == room.round_id)
        .ok_or_else(|| ServiceError::NotFound(format!("no round running in `{code}`")))?;
    Ok(RoundView::from(&round))
}

/// Return the latest compiled results, with answers revealed.
pub async fn get_results(state: &SharedState, code: &str) -> Result<ResultsView, ServiceError> {
    let code = parse_code(code)?;
    let coordinator = state.coordinator().await?;
    let results: RoundResultsEntity = coordinator
        .read(&keys::results(&code))
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("no results for `{code}`")))?;
    Ok(ResultsView::from(&results))
}
