use crate::db::models::{Network, NetworkInput};
use crate::reconciler::NetworkStatus;
use crate::{VpnmuxError, router::VpnmuxState};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

pub async fn list_networks(
    State(state): State<VpnmuxState>,
) -> Result<Json<Vec<Network>>, VpnmuxError> {
    Ok(Json(state.handle.list_networks().await?))
}

/// GET /network/{id} -> the network row plus its live tunnel.
pub async fn get_network(
    State(state): State<VpnmuxState>,
    Path(id): Path<String>,
) -> Result<Json<NetworkStatus>, VpnmuxError> {
    Ok(Json(state.handle.get_network(id).await?))
}

pub async fn create_network(
    State(state): State<VpnmuxState>,
    Json(input): Json<NetworkInput>,
) -> Result<(StatusCode, Json<NetworkStatus>), VpnmuxError> {
    let status = state.handle.create_network(input).await?;
    Ok((StatusCode::CREATED, Json(status)))
}

/// PATCH /network/{id} -> always refused; delete and recreate instead.
pub async fn update_network(
    State(state): State<VpnmuxState>,
    Path(id): Path<String>,
) -> Result<Json<NetworkStatus>, VpnmuxError> {
    Ok(Json(state.handle.update_network(id).await?))
}

pub async fn delete_network(
    State(state): State<VpnmuxState>,
    Path(id): Path<String>,
) -> Result<StatusCode, VpnmuxError> {
    state.handle.delete_network(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
