use crate::db::models::{Config, ConfigInput};
use crate::{VpnmuxError, router::VpnmuxState};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

pub async fn list_configs(
    State(state): State<VpnmuxState>,
) -> Result<Json<Vec<Config>>, VpnmuxError> {
    Ok(Json(state.handle.list_configs().await?))
}

/// GET /config/{id} -> re-renders the tunnel config files if they went missing.
pub async fn get_config(
    State(state): State<VpnmuxState>,
    Path(id): Path<String>,
) -> Result<Json<Config>, VpnmuxError> {
    Ok(Json(state.handle.get_config(id).await?))
}

pub async fn create_config(
    State(state): State<VpnmuxState>,
    Json(input): Json<ConfigInput>,
) -> Result<(StatusCode, Json<Config>), VpnmuxError> {
    let cfg = state.handle.create_config(input).await?;
    Ok((StatusCode::CREATED, Json(cfg)))
}

pub async fn update_config(
    State(state): State<VpnmuxState>,
    Path(id): Path<String>,
    Json(input): Json<ConfigInput>,
) -> Result<Json<Config>, VpnmuxError> {
    Ok(Json(state.handle.update_config(id, input).await?))
}

pub async fn delete_config(
    State(state): State<VpnmuxState>,
    Path(id): Path<String>,
) -> Result<StatusCode, VpnmuxError> {
    state.handle.delete_config(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
