use crate::db::models::{AssignmentInput, Client, ClientInput, ClientNetwork};
use crate::reconciler::AssignmentStatus;
use crate::{VpnmuxError, router::VpnmuxState};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

pub async fn list_clients(
    State(state): State<VpnmuxState>,
) -> Result<Json<Vec<Client>>, VpnmuxError> {
    Ok(Json(state.handle.list_clients().await?))
}

pub async fn get_client(
    State(state): State<VpnmuxState>,
    Path(id): Path<String>,
) -> Result<Json<Client>, VpnmuxError> {
    Ok(Json(state.handle.get_client(id).await?))
}

pub async fn create_client(
    State(state): State<VpnmuxState>,
    Json(input): Json<ClientInput>,
) -> Result<(StatusCode, Json<Client>), VpnmuxError> {
    let client = state.handle.create_client(input).await?;
    Ok((StatusCode::CREATED, Json(client)))
}

pub async fn update_client(
    State(state): State<VpnmuxState>,
    Path(id): Path<String>,
    Json(input): Json<ClientInput>,
) -> Result<Json<Client>, VpnmuxError> {
    Ok(Json(state.handle.update_client(id, input).await?))
}

pub async fn delete_client(
    State(state): State<VpnmuxState>,
    Path(id): Path<String>,
) -> Result<StatusCode, VpnmuxError> {
    state.handle.delete_client(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /client-network -> every current assignment.
pub async fn list_assignments(
    State(state): State<VpnmuxState>,
) -> Result<Json<Vec<ClientNetwork>>, VpnmuxError> {
    Ok(Json(state.handle.list_assignments().await?))
}

pub async fn get_assignment(
    State(state): State<VpnmuxState>,
    Path(id): Path<String>,
) -> Result<Json<AssignmentStatus>, VpnmuxError> {
    Ok(Json(state.handle.get_assignment(id).await?))
}

/// PUT /client/{id}/network -> route the client through `network_id`.
pub async fn assign(
    State(state): State<VpnmuxState>,
    Path(id): Path<String>,
    Json(input): Json<AssignmentInput>,
) -> Result<Json<AssignmentStatus>, VpnmuxError> {
    Ok(Json(state.handle.assign(id, input.network_id).await?))
}

pub async fn unassign(
    State(state): State<VpnmuxState>,
    Path(id): Path<String>,
) -> Result<StatusCode, VpnmuxError> {
    state.handle.unassign(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
