//! Database module: desired state for credentials, configs, networks, clients,
//! client assignments and the DNS route.
//!
//! Layout:
//! - `models.rs`: Rust structs mirroring DB rows and API inputs
//! - `schema.rs`: SQL DDL for initializing the database (SQLite)
//! - `sqlite.rs`: `Storage` and one store per entity

pub mod models;
pub mod schema;
pub mod sqlite;

pub use models::{Client, ClientNetwork, Config, Credential, DnsRoute, Network};
pub use schema::SQLITE_INIT;
pub use sqlite::{SqlitePool, Storage};
