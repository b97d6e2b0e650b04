//! Friend-request and friendship endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::UserId;
use domain::FriendRequest;
use saga::{SagaOrchestrator, SagaState};
use serde::{Deserialize, Serialize};
use storage::SocialStore;

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: SocialStore> {
    pub orchestrator: SagaOrchestrator<S>,
    pub store: Arc<S>,
}

// -- Request types --

#[derive(Deserialize)]
pub struct ParticipantsRequest {
    pub requester_id: String,
    pub receiver_id: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct RequestCreatedResponse {
    pub requester_id: String,
    pub receiver_id: String,
    pub status: String,
}

#[derive(Serialize)]
pub struct FriendshipResponse {
    pub user_id: String,
    pub friend_id: String,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct AcceptResponse {
    pub saga_id: String,
    pub state: String,
    pub friendships: Vec<FriendshipResponse>,
}

// -- Handlers --

/// POST /friend-requests — create a pending friend request.
#[tracing::instrument(skip(state, req))]
pub async fn create_request<S: SocialStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<ParticipantsRequest>,
) -> Result<(StatusCode, Json<RequestCreatedResponse>), ApiError> {
    let (requester_id, receiver_id) = parse_participants(&req)?;

    let request = FriendRequest::new(requester_id, receiver_id)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    state.store.insert_request(&request).await?;

    Ok((
        StatusCode::CREATED,
        Json(RequestCreatedResponse {
            requester_id: requester_id.to_string(),
            receiver_id: receiver_id.to_string(),
            status: request.status().to_string(),
        }),
    ))
}

/// POST /friend-requests/accept — run the friend-acceptance saga.
#[tracing::instrument(skip(state, req))]
pub async fn accept_request<S: SocialStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<ParticipantsRequest>,
) -> Result<Json<AcceptResponse>, ApiError> {
    let (requester_id, receiver_id) = parse_participants(&req)?;

    let result = state
        .orchestrator
        .accept_friend_request(requester_id, receiver_id)
        .await;

    match result.state {
        SagaState::Completed => Ok(Json(AcceptResponse {
            saga_id: result.saga_id.to_string(),
            state: result.state.to_string(),
            friendships: result
                .friendships
                .iter()
                .map(|f| FriendshipResponse {
                    user_id: f.user_id.to_string(),
                    friend_id: f.friend_id.to_string(),
                    created_at: f.created_at.to_rfc3339(),
                })
                .collect(),
        })),
        _ => match result.error {
            Some(saga::SagaError::RequestNotFound { .. }) => Err(ApiError::NotFound(format!(
                "No pending friend request from {requester_id} to {receiver_id}"
            ))),
            // Compensated and failed sagas read the same to the client:
            // the acceptance did not go through.
            _ => Err(ApiError::Conflict(
                "Friend request could not be accepted, please retry".to_string(),
            )),
        },
    }
}

/// GET /friends/:user_id — list a user's friendships.
#[tracing::instrument(skip(state))]
pub async fn list_friends<S: SocialStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<FriendshipResponse>>, ApiError> {
    let user_id = parse_user_id(&user_id, "user_id")?;

    let friendships = state.store.friendships_for(user_id).await?;

    Ok(Json(
        friendships
            .iter()
            .map(|f| FriendshipResponse {
                user_id: f.user_id.to_string(),
                friend_id: f.friend_id.to_string(),
                created_at: f.created_at.to_rfc3339(),
            })
            .collect(),
    ))
}

fn parse_participants(req: &ParticipantsRequest) -> Result<(UserId, UserId), ApiError> {
    Ok((
        parse_user_id(&req.requester_id, "requester_id")?,
        parse_user_id(&req.receiver_id, "receiver_id")?,
    ))
}

fn parse_user_id(raw: &str, field: &str) -> Result<UserId, ApiError> {
    let uuid = uuid::Uuid::parse_str(raw)
        .map_err(|e| ApiError::BadRequest(format!("Invalid {field}: {e}")))?;
    Ok(UserId::from_uuid(uuid))
}
