use crate::db::models::{Credential, CredentialInput};
use crate::{VpnmuxError, router::VpnmuxState};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

/// GET /credential -> every credential, values withheld.
pub async fn list_credentials(
    State(state): State<VpnmuxState>,
) -> Result<Json<Vec<Credential>>, VpnmuxError> {
    Ok(Json(state.handle.list_credentials().await?))
}

pub async fn get_credential(
    State(state): State<VpnmuxState>,
    Path(id): Path<String>,
) -> Result<Json<Credential>, VpnmuxError> {
    Ok(Json(state.handle.get_credential(id).await?))
}

pub async fn create_credential(
    State(state): State<VpnmuxState>,
    Json(input): Json<CredentialInput>,
) -> Result<(StatusCode, Json<Credential>), VpnmuxError> {
    let cred = state.handle.create_credential(input).await?;
    Ok((StatusCode::CREATED, Json(cred)))
}

/// PATCH /credential/{id} -> rejected while a config references it.
pub async fn update_credential(
    State(state): State<VpnmuxState>,
    Path(id): Path<String>,
    Json(input): Json<CredentialInput>,
) -> Result<Json<Credential>, VpnmuxError> {
    Ok(Json(state.handle.update_credential(id, input).await?))
}

pub async fn delete_credential(
    State(state): State<VpnmuxState>,
    Path(id): Path<String>,
) -> Result<StatusCode, VpnmuxError> {
    state.handle.delete_credential(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
