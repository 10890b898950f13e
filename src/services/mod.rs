/// Fan-out of outbound frames to connections and rooms.
pub mod broadcast;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Bearer-token verification for session frames.
pub mod identity;
/// Room creation, joining, leaving and round configuration.
pub mod membership_service;
/// Problem drawing and concurrent fetching.
pub mod problem_generator;
/// Read-only projections for HTTP clients.
pub mod public_service;
/// Markup sanitizing for problem bodies.
pub mod renderer;
/// Round start, answers, submission and results.
pub mod round_service;
/// Answer checking and standings.
pub mod scoring;
/// Storage connection supervisor with reconnect backoff.
pub mod storage_supervisor;
/// WebSocket connection and message handling service.
pub mod websocket_service;
