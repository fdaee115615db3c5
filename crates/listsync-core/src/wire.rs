//! Text-safe request and response bodies
//!
//! Binary payloads (document state, state vectors, updates) travel as base64
//! strings; field names are camelCase. Every handler maps failures to an
//! [`ErrorResponse`] carrying the stable error code.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::directory::TaskDirectory;
use crate::error::SyncError;
use crate::session::{DocumentSnapshot, SessionManager, SessionStart, UpdateAck};
use crate::types::{DeviceId, SessionId, SessionType, TaskListId, UserId};

/// Encode bytes for the wire
pub fn encode_bytes(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode an update payload; bad base64 is a malformed update
pub fn decode_update(encoded: &str) -> Result<Vec<u8>, SyncError> {
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| SyncError::UpdateDecode(format!("invalid base64: {}", e)))
}

/// Decode a state vector payload
pub fn decode_state_vector(encoded: &str) -> Result<Vec<u8>, SyncError> {
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| SyncError::StateVectorDecode(format!("invalid base64: {}", e)))
}

/// A missing device id is treated like a blank one
fn device(device_id: Option<String>) -> DeviceId {
    DeviceId::new(device_id.unwrap_or_default())
}

// ═══════════════════════════════════════════════════════════════════════════
// Requests
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    pub task_list_id: String,
    pub user_id: String,
    #[serde(default)]
    pub device_id: Option<String>,
    /// Defaults to `active`
    #[serde(default)]
    pub session_type: Option<SessionType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetStateRequest {
    pub task_list_id: String,
    pub user_id: String,
    #[serde(default)]
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyUpdateRequest {
    pub task_list_id: String,
    pub user_id: String,
    #[serde(default)]
    pub device_id: Option<String>,
    /// Base64 update
    pub update: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffRequest {
    pub task_list_id: String,
    pub user_id: String,
    #[serde(default)]
    pub device_id: Option<String>,
    /// Base64 state vector; empty asks for the full history
    #[serde(default)]
    pub state_vector: String,
}

/// Body of keep-alive and end requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub session_id: String,
}

// ═══════════════════════════════════════════════════════════════════════════
// Responses
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionResponse {
    pub session_id: String,
    pub document_state: String,
    pub state_vector: String,
    pub expires_at: i64,
}

impl From<SessionStart> for StartSessionResponse {
    fn from(start: SessionStart) -> Self {
        Self {
            session_id: start.session_id.as_str().to_string(),
            document_state: encode_bytes(&start.document_state),
            state_vector: encode_bytes(&start.state_vector),
            expires_at: start.expires_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateResponse {
    pub document_state: String,
    pub state_vector: String,
    pub has_updates: bool,
}

impl From<DocumentSnapshot> for StateResponse {
    fn from(snapshot: DocumentSnapshot) -> Self {
        Self {
            document_state: encode_bytes(&snapshot.document_state),
            state_vector: encode_bytes(&snapshot.state_vector),
            has_updates: snapshot.has_updates,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyUpdateResponse {
    pub success: bool,
    pub state_vector: String,
}

impl From<UpdateAck> for ApplyUpdateResponse {
    fn from(ack: UpdateAck) -> Self {
        Self {
            success: ack.success,
            state_vector: encode_bytes(&ack.state_vector),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffResponse {
    /// Base64 update, absent when the device is up to date
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

/// Error body: stable code plus a human-readable message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<SyncError> for ErrorResponse {
    fn from(e: SyncError) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorResponse {}

// ═══════════════════════════════════════════════════════════════════════════
// Handlers
// ═══════════════════════════════════════════════════════════════════════════

pub async fn start_session<D: TaskDirectory>(
    manager: &SessionManager<D>,
    request: StartSessionRequest,
) -> Result<StartSessionResponse, ErrorResponse> {
    let start = manager
        .start_session(
            &TaskListId::new(request.task_list_id),
            &UserId::new(request.user_id),
            &device(request.device_id),
            request.session_type.unwrap_or(SessionType::Active),
        )
        .await?;
    Ok(start.into())
}

pub async fn get_state<D: TaskDirectory>(
    manager: &SessionManager<D>,
    request: GetStateRequest,
) -> Result<StateResponse, ErrorResponse> {
    let snapshot = manager
        .get_state(
            &TaskListId::new(request.task_list_id),
            &UserId::new(request.user_id),
            &device(request.device_id),
        )
        .await?;
    Ok(snapshot.into())
}

pub async fn apply_update<D: TaskDirectory>(
    manager: &SessionManager<D>,
    request: ApplyUpdateRequest,
) -> Result<ApplyUpdateResponse, ErrorResponse> {
    let device_id = device(request.device_id);
    if device_id.is_blank() {
        return Err(SyncError::DeviceIdRequired.into());
    }
    let update = decode_update(&request.update)?;
    let ack = manager
        .apply_update(
            &TaskListId::new(request.task_list_id),
            &UserId::new(request.user_id),
            &device_id,
            &update,
        )
        .await?;
    Ok(ack.into())
}

pub async fn diff_since<D: TaskDirectory>(
    manager: &SessionManager<D>,
    request: DiffRequest,
) -> Result<DiffResponse, ErrorResponse> {
    let device_id = device(request.device_id);
    if device_id.is_blank() {
        return Err(SyncError::DeviceIdRequired.into());
    }
    let state_vector = decode_state_vector(&request.state_vector)?;
    let update = manager
        .diff_since(
            &TaskListId::new(request.task_list_id),
            &UserId::new(request.user_id),
            &device_id,
            &state_vector,
        )
        .await?;
    Ok(DiffResponse {
        update: update.as_deref().map(encode_bytes),
    })
}

pub async fn keep_alive<D: TaskDirectory>(
    manager: &SessionManager<D>,
    request: SessionRequest,
) -> Result<SuccessResponse, ErrorResponse> {
    let expires_at = manager
        .keep_alive(&SessionId::from_string(request.session_id))
        .await?;
    Ok(SuccessResponse {
        success: true,
        expires_at: Some(expires_at),
    })
}

pub async fn end_session<D: TaskDirectory>(
    manager: &SessionManager<D>,
    request: SessionRequest,
) -> Result<SuccessResponse, ErrorResponse> {
    manager
        .end_session(&SessionId::from_string(request.session_id))
        .await?;
    Ok(SuccessResponse {
        success: true,
        expires_at: None,
    })
}
