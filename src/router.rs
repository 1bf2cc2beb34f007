use crate::handlers::{clients, configs, credentials, dns, networks};
use crate::service::ReconcilerHandle;
use axum::{Router, http::StatusCode, routing::get};

#[derive(Clone)]
pub struct VpnmuxState {
    pub handle: ReconcilerHandle,
}

impl VpnmuxState {
    pub fn new(handle: ReconcilerHandle) -> Self {
        Self { handle }
    }
}

pub fn vpnmux_router(state: VpnmuxState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/credential",
            get(credentials::list_credentials).post(credentials::create_credential),
        )
        .route(
            "/credential/{id}",
            get(credentials::get_credential)
                .patch(credentials::update_credential)
                .delete(credentials::delete_credential),
        )
        .route(
            "/config",
            get(configs::list_configs).post(configs::create_config),
        )
        .route(
            "/config/{id}",
            get(configs::get_config)
                .patch(configs::update_config)
                .delete(configs::delete_config),
        )
        .route(
            "/network",
            get(networks::list_networks).post(networks::create_network),
        )
        .route(
            "/network/{id}",
            get(networks::get_network)
                .patch(networks::update_network)
                .delete(networks::delete_network),
        )
        .route(
            "/client",
            get(clients::list_clients).post(clients::create_client),
        )
        .route(
            "/client/{id}",
            get(clients::get_client)
                .patch(clients::update_client)
                .delete(clients::delete_client),
        )
        .route(
            "/client/{id}/network",
            get(clients::get_assignment)
                .put(clients::assign)
                .delete(clients::unassign),
        )
        .route("/client-network", get(clients::list_assignments))
        .route(
            "/dns",
            get(dns::get_dns).put(dns::set_dns).delete(dns::clear_dns),
        )
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
