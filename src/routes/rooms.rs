use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};

use crate::{
    dto::room::{ResultsView, RoomView, RoundView},
    error::AppError,
    services::public_service,
    state::SharedState,
};

/// Read-only room endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/rooms/{code}", get(get_room))
        .route("/rooms/{code}/round", get(get_round))
        .route("/rooms/{code}/results", get(get_results))
}

#[utoipa::path(
    get,
    path = "/rooms/{code}",
    tag = "rooms",
    params(("code" = String, Path, description = "Room code")),
    responses(
        (status = 200, description = "Room", body = RoomView),
        (status = 404, description = "Unknown room")
    )
)]
/// Return a room's settings, members and lifecycle state.
pub async fn get_room(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<RoomView>, AppError> {
    let payload = public_service::get_room(&state, &code).await?;
    Ok(Json(payload))
}

#[utoipa::path(
    get,
    path = "/rooms/{code}/round",
    tag = "rooms",
    params(("code" = String, Path, description = "Room code")),
    responses(
        (status = 200, description = "Round in progress", body = RoundView),
        (status = 404, description = "No round running")
    )
)]
/// Return the problems of the round in progress, without answers.
pub async fn get_round(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<RoundView>, AppError> {
    let payload = public_service::get_round(&state, &code).await?;
    Ok(Json(payload))
}

#[utoipa::path(
    get,
    path = "/rooms/{code}/results",
    tag = "rooms",
    params(("code" = String, Path, description = "Room code")),
    responses(
        (status = 200, description = "Latest results", body = ResultsView),
        (status = 404, description = "No results yet")
    )
)]
/// Return the standings and revealed answers of the latest round.
pub async fn get_results(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<ResultsView>, AppError> {
    let payload = public_service::get_results(&state, &code).await?;
    Ok(Json(payload))
}
