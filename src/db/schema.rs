//! SQL DDL for the desired-state store.
//!
//! Foreign keys are declared for documentation and enforced when the pool
//! enables them, but the reconcilers check references themselves before
//! deleting anything.

/// SQLite schema with:
/// - TEXT uuid primary keys for every entity
/// - `config.*_c` columns referencing `credential`
/// - `client_network` keyed by client; absence of a row means unassigned
/// - `dns_route` constrained to a single row (`id = 0`)
pub const SQLITE_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS credential (
    id TEXT NOT NULL PRIMARY KEY,
    name TEXT NOT NULL,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS config (
    id TEXT NOT NULL PRIMARY KEY,
    name TEXT NOT NULL,
    host TEXT NOT NULL,
    user_c TEXT NOT NULL REFERENCES credential(id),
    pass_c TEXT NOT NULL REFERENCES credential(id),
    ca_c TEXT NOT NULL REFERENCES credential(id),
    ovpn_c TEXT NOT NULL REFERENCES credential(id)
);

CREATE TABLE IF NOT EXISTS network (
    id TEXT NOT NULL PRIMARY KEY,
    name TEXT NOT NULL,
    config_id TEXT NOT NULL REFERENCES config(id)
);

CREATE TABLE IF NOT EXISTS client (
    id TEXT NOT NULL PRIMARY KEY,
    name TEXT NOT NULL,
    address TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS client_network (
    client_id TEXT NOT NULL PRIMARY KEY REFERENCES client(id),
    network_id TEXT NOT NULL REFERENCES network(id)
);

CREATE INDEX IF NOT EXISTS idx_client_network_network_id ON client_network(network_id);

CREATE TABLE IF NOT EXISTS dns_route (
    id INTEGER NOT NULL PRIMARY KEY CHECK (id = 0),
    network_id TEXT NOT NULL REFERENCES network(id)
);
"#;
