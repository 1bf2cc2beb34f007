pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod net;
pub mod openvpn;
pub mod reconciler;
pub mod router;
pub mod runtime;
pub mod service;
pub mod system;
pub mod tunnel;

pub use error::VpnmuxError;
pub use reconciler::Reconciler;
pub use service::ReconcilerHandle;
