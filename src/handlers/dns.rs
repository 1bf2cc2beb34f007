use crate::db::models::AssignmentInput;
use crate::reconciler::DnsStatus;
use crate::{VpnmuxError, router::VpnmuxState};
use axum::{Json, extract::State, http::StatusCode};

pub async fn get_dns(State(state): State<VpnmuxState>) -> Result<Json<DnsStatus>, VpnmuxError> {
    Ok(Json(state.handle.get_dns().await?))
}

/// PUT /dns -> send DNS queries through `network_id`'s tunnel.
pub async fn set_dns(
    State(state): State<VpnmuxState>,
    Json(input): Json<AssignmentInput>,
) -> Result<Json<DnsStatus>, VpnmuxError> {
    Ok(Json(state.handle.set_dns(input.network_id).await?))
}

pub async fn clear_dns(State(state): State<VpnmuxState>) -> Result<StatusCode, VpnmuxError> {
    state.handle.clear_dns().await?;
    Ok(StatusCode::NO_CONTENT)
}
