use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Contest Arena.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::websocket::ws_handler,
        crate::routes::rooms::get_room,
        crate::routes::rooms::get_round,
        crate::routes::rooms::get_results,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::HealthStatus,
            crate::dto::room::RoomView,
            crate::dto::room::RoundView,
            crate::dto::room::ProblemView,
            crate::dto::room::ResultsView,
            crate::dto::room::StandingView,
            crate::dto::room::SolutionView,
            crate::dto::ws::CreateRoomRequest,
            crate::dto::ws::RoomRequest,
            crate::dto::ws::ConfigureRoundRequest,
            crate::dto::ws::SubjectSettingsInput,
            crate::dto::ws::RecordAnswerRequest,
            crate::dto::ws::OutboundMessage,
            crate::state::lifecycle::LifecycleState,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "rooms", description = "Read-only room, round and results projections"),
        (name = "session", description = "WebSocket session channel for participants"),
    )
)]
pub struct ApiDoc;
