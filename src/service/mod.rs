pub mod reconciler_actor;

pub use reconciler_actor::{ReconcilerHandle, ReconcilerMessage, spawn};
