use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use utoipa::ToSchema;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{
    dto::{
        room::{ResultsView, RoomView, RoundView},
        validation::{
            TEXT_ANSWER_MAX_CHARS, validate_bounded, validate_description, validate_finite,
            validate_room_code, validate_title,
        },
    },
    error::ServiceError,
    state::contest::{RoomCode, RoomMode, Scalar, SubjectId, Visibility},
};

pub const MAX_PARTICIPANTS_LIMIT: u32 = 32;
pub const ROUND_MINUTES_LIMIT: u32 = 300;
pub const PROBLEM_COUNT_LIMIT: u32 = 30;

/// Frame envelope as it arrives on the socket; `data` is decoded once `type` is known.
#[derive(Debug, Deserialize)]
struct RawInbound {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    data: Value,
}

/// A decoded client frame.
#[derive(Debug)]
pub struct InboundMessage {
    pub token: Option<String>,
    pub action: InboundAction,
}

/// Actions a client can request.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundAction {
    CreateRoom(CreateRoomRequest),
    JoinRoom(RoomRequest),
    ExitRoom,
    ConfigureRound(ConfigureRoundRequest),
    StartRound(RoomRequest),
    RecordAnswer(RecordAnswerRequest),
    SubmitAnswer(RoomRequest),
}

impl InboundAction {
    pub fn name(&self) -> &'static str {
        match self {
            InboundAction::CreateRoom(_) => "create_room",
            InboundAction::JoinRoom(_) => "join_room",
            InboundAction::ExitRoom => "exit_room",
            InboundAction::ConfigureRound(_) => "configure_round",
            InboundAction::StartRound(_) => "start_round",
            InboundAction::RecordAnswer(_) => "record_answer",
            InboundAction::SubmitAnswer(_) => "submit_answer",
        }
    }
}

/// A frame that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct InboundError {
    /// Action named by the frame, when it got that far.
    pub action: Option<String>,
    pub reason: String,
}

impl InboundMessage {
    pub fn from_json_str(text: &str) -> Result<Self, InboundError> {
        let raw: RawInbound = serde_json::from_str(text).map_err(|err| InboundError {
            action: None,
            reason: format!("malformed frame: {err}"),
        })?;

        let payload_error = |err: serde_json::Error| InboundError {
            action: Some(raw.kind.clone()),
            reason: format!("malformed `{}` payload: {err}", raw.kind),
        };
        let data = || {
            if raw.data.is_null() {
                Value::Object(Default::default())
            } else {
                raw.data.clone()
            }
        };

        let action = match raw.kind.as_str() {
            "create_room" => {
                InboundAction::CreateRoom(serde_json::from_value(data()).map_err(payload_error)?)
            }
            "join_room" => {
                InboundAction::JoinRoom(serde_json::from_value(data()).map_err(payload_error)?)
            }
            "exit_room" => InboundAction::ExitRoom,
            "configure_round" => InboundAction::ConfigureRound(
                serde_json::from_value(data()).map_err(payload_error)?,
            ),
            "start_round" => {
                InboundAction::StartRound(serde_json::from_value(data()).map_err(payload_error)?)
            }
            "record_answer" => {
                InboundAction::RecordAnswer(serde_json::from_value(data()).map_err(payload_error)?)
            }
            "submit_answer" => {
                InboundAction::SubmitAnswer(serde_json::from_value(data()).map_err(payload_error)?)
            }
            other => {
                return Err(InboundError {
                    action: Some(other.to_string()),
                    reason: format!("unknown action `{other}`"),
                });
            }
        };

        Ok(Self {
            token: raw.token,
            action,
        })
    }
}

/// Settings for a new room.
#[derive(Debug, Clone, PartialEq, Deserialize, ToSchema)]
pub struct CreateRoomRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mode: RoomMode,
    #[serde(default)]
    pub visibility: Visibility,
    /// Defaults to the configured capacity.
    #[serde(default)]
    pub max_participants: Option<u32>,
    #[serde(default)]
    pub round_time_limit_minutes: Option<u32>,
}

impl Validate for CreateRoomRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if let Err(e) = validate_title(&self.title) {
            errors.add("title", e);
        }
        if let Err(e) = validate_description(&self.description) {
            errors.add("description", e);
        }
        if let Some(max) = self.max_participants {
            if let Err(e) = validate_bounded(max, 1, MAX_PARTICIPANTS_LIMIT) {
                errors.add("max_participants", e);
            }
        }
        if let Some(minutes) = self.round_time_limit_minutes {
            if let Err(e) = validate_bounded(minutes, 1, ROUND_MINUTES_LIMIT) {
                errors.add("round_time_limit_minutes", e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Payload naming a room by code.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, ToSchema)]
pub struct RoomRequest {
    pub code: String,
}

impl RoomRequest {
    pub fn room_code(&self) -> Result<RoomCode, ServiceError> {
        parse_code(&self.code)
    }
}

impl Validate for RoomRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Err(e) = validate_room_code(&self.code) {
            errors.add("code", e);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn parse_code(code: &str) -> Result<RoomCode, ServiceError> {
    RoomCode::parse(code).ok_or_else(|| ServiceError::InvalidInput(format!("bad room code `{code}`")))
}

#[derive(Debug, Clone, PartialEq, Deserialize, ToSchema)]
pub struct SubjectSettingsInput {
    pub subject: SubjectId,
    pub selected: bool,
    pub problem_count: u32,
    pub correct_score: f64,
    pub blank_score: f64,
}

/// Host-only update of the next round's contest settings.
#[derive(Debug, Clone, PartialEq, Deserialize, ToSchema)]
pub struct ConfigureRoundRequest {
    pub code: String,
    pub subjects: Vec<SubjectSettingsInput>,
    #[serde(default)]
    pub round_time_limit_minutes: Option<u32>,
}

impl ConfigureRoundRequest {
    pub fn room_code(&self) -> Result<RoomCode, ServiceError> {
        parse_code(&self.code)
    }
}

impl Validate for ConfigureRoundRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if let Err(e) = validate_room_code(&self.code) {
            errors.add("code", e);
        }

        for settings in &self.subjects {
            let tag = |mut e: ValidationError| {
                e.add_param("subject".into(), &settings.subject);
                e
            };
            if let Err(e) = validate_bounded(settings.problem_count, 0, PROBLEM_COUNT_LIMIT) {
                errors.add("problem_count", tag(e));
            }
            if let Err(e) = validate_finite(settings.correct_score) {
                errors.add("correct_score", tag(e));
            }
            if let Err(e) = validate_finite(settings.blank_score) {
                errors.add("blank_score", tag(e));
            }
        }

        if !self
            .subjects
            .iter()
            .any(|settings| settings.selected && settings.problem_count > 0)
        {
            let mut err = ValidationError::new("no_subject_selected");
            err.message = Some("Select at least one subject with one or more problems".into());
            errors.add("subjects", err);
        }

        if let Some(minutes) = self.round_time_limit_minutes {
            if let Err(e) = validate_bounded(minutes, 1, ROUND_MINUTES_LIMIT) {
                errors.add("round_time_limit_minutes", e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Sets or clears (`answer: null`) the caller's answer to one problem.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, ToSchema)]
pub struct RecordAnswerRequest {
    pub code: String,
    pub index: usize,
    #[serde(default)]
    pub answer: Option<Scalar>,
}

impl RecordAnswerRequest {
    pub fn room_code(&self) -> Result<RoomCode, ServiceError> {
        parse_code(&self.code)
    }
}

impl Validate for RecordAnswerRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if let Err(e) = validate_room_code(&self.code) {
            errors.add("code", e);
        }

        if let Some(Scalar::Text(text)) = &self.answer {
            let length = text.chars().count();
            if text.trim().is_empty() || length > TEXT_ANSWER_MAX_CHARS {
                let mut err = ValidationError::new("answer_length");
                err.message = Some(
                    format!("Answers must be 1 to {TEXT_ANSWER_MAX_CHARS} characters").into(),
                );
                errors.add("answer", err);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Everything the server pushes down a socket.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    CreateRoomSuccess {
        room: RoomView,
    },
    JoinRoomSuccess {
        room: RoomView,
    },
    ExitRoomSuccess {
        code: RoomCode,
    },
    ConfigureRoundSuccess {
        code: RoomCode,
    },
    StartRoundSuccess {
        code: RoomCode,
        /// Problems actually in the round; may be fewer than requested.
        problems: usize,
    },
    RecordAnswerSuccess {
        code: RoomCode,
        index: usize,
    },
    SubmitAnswerSuccess {
        code: RoomCode,
        /// `false` when the request changed nothing (already submitted, round over).
        changed: bool,
    },
    /// Failure of the caller's own request; never broadcast.
    Error {
        action: Option<String>,
        error: String,
        message: String,
    },
    #[serde(rename = "starting-game")]
    StartingGame { code: RoomCode },
    #[serde(rename = "started-game")]
    StartedGame { code: RoomCode, round: RoundView },
    #[serde(rename = "results-compiled")]
    ResultsCompiled { code: RoomCode, results: ResultsView },
    #[serde(rename = "room-updated")]
    RoomUpdated { room: RoomView },
}

impl OutboundMessage {
    pub fn failure(action: Option<&str>, err: &ServiceError) -> Self {
        OutboundMessage::Error {
            action: action.map(str::to_string),
            error: err.code().to_string(),
            message: err.client_message(),
        }
    }

    pub fn malformed(err: &InboundError) -> Self {
        OutboundMessage::Error {
            action: err.action.clone(),
            error: "input_error".into(),
            message: err.reason.clone(),
        }
    }
}
