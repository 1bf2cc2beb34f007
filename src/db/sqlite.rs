use crate::db::models::{
    Client, ClientInput, ClientNetwork, Config, ConfigInput, Credential, CredentialInput,
    DnsRoute, Network, NetworkInput,
};
use crate::db::schema::SQLITE_INIT;
use crate::error::VpnmuxError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteQueryResult};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use uuid::Uuid;

pub type SqlitePool = Pool<Sqlite>;

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Map "no row touched" to `NotFound`.
fn expect_one(
    result: SqliteQueryResult,
    kind: &'static str,
    id: &str,
) -> Result<(), VpnmuxError> {
    if result.rows_affected() != 1 {
        return Err(VpnmuxError::not_found(kind, id));
    }
    Ok(())
}

/// Handle to the SQLite database; hands out one store per entity type.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `url` and apply the schema.
    pub async fn connect(url: &str) -> Result<Self, VpnmuxError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let storage = Self::new(pool);
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Private in-memory database. A single, never recycled connection keeps
    /// the data alive for the lifetime of the pool.
    pub async fn in_memory() -> Result<Self, VpnmuxError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let storage = Self::new(pool);
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Initialize the schema by executing the bundled DDL.
    pub async fn init_schema(&self) -> Result<(), VpnmuxError> {
        // sqlx::query runs a single statement
        for stmt in SQLITE_INIT.split(';') {
            let s = stmt.trim();
            if s.is_empty() {
                continue;
            }
            sqlx::query(s).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn credentials(&self) -> CredentialStore {
        CredentialStore {
            pool: self.pool.clone(),
        }
    }

    pub fn configs(&self) -> ConfigStore {
        ConfigStore {
            pool: self.pool.clone(),
        }
    }

    pub fn networks(&self) -> NetworkStore {
        NetworkStore {
            pool: self.pool.clone(),
        }
    }

    pub fn clients(&self) -> ClientStore {
        ClientStore {
            pool: self.pool.clone(),
        }
    }

    pub fn client_networks(&self) -> ClientNetworkStore {
        ClientNetworkStore {
            pool: self.pool.clone(),
        }
    }

    pub fn dns(&self) -> DnsStore {
        DnsStore {
            pool: self.pool.clone(),
        }
    }
}

#[derive(Clone)]
pub struct CredentialStore {
    pool: SqlitePool,
}

impl CredentialStore {
    pub async fn list(&self) -> Result<Vec<Credential>, VpnmuxError> {
        let rows = sqlx::query_as::<_, Credential>(
            "SELECT id, name, value FROM credential ORDER BY name, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get(&self, id: &str) -> Result<Credential, VpnmuxError> {
        sqlx::query_as::<_, Credential>("SELECT id, name, value FROM credential WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| VpnmuxError::not_found("credential", id))
    }

    pub async fn create(&self, input: CredentialInput) -> Result<Credential, VpnmuxError> {
        let cred = Credential {
            id: new_id(),
            name: input.name,
            value: input.value,
        };
        sqlx::query("INSERT INTO credential (id, name, value) VALUES (?, ?, ?)")
            .bind(&cred.id)
            .bind(&cred.name)
            .bind(&cred.value)
            .execute(&self.pool)
            .await?;
        Ok(cred)
    }

    pub async fn update(&self, cred: &Credential) -> Result<(), VpnmuxError> {
        let result = sqlx::query("UPDATE credential SET name = ?, value = ? WHERE id = ?")
            .bind(&cred.name)
            .bind(&cred.value)
            .bind(&cred.id)
            .execute(&self.pool)
            .await?;
        expect_one(result, "credential", &cred.id)
    }

    pub async fn delete(&self, id: &str) -> Result<(), VpnmuxError> {
        let result = sqlx::query("DELETE FROM credential WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_one(result, "credential", id)
    }
}

const CONFIG_COLUMNS: &str = "id, name, host, user_c, pass_c, ca_c, ovpn_c";

#[derive(Clone)]
pub struct ConfigStore {
    pool: SqlitePool,
}

impl ConfigStore {
    pub async fn list(&self) -> Result<Vec<Config>, VpnmuxError> {
        let sql = format!("SELECT {CONFIG_COLUMNS} FROM config ORDER BY name, id");
        let rows = sqlx::query_as::<_, Config>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn get(&self, id: &str) -> Result<Config, VpnmuxError> {
        let sql = format!("SELECT {CONFIG_COLUMNS} FROM config WHERE id = ?");
        sqlx::query_as::<_, Config>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| VpnmuxError::not_found("config", id))
    }

    /// Configs referencing `credential_id` in any of their four slots.
    pub async fn referencing(&self, credential_id: &str) -> Result<Vec<Config>, VpnmuxError> {
        let sql = format!(
            "SELECT {CONFIG_COLUMNS} FROM config \
             WHERE user_c = ? OR pass_c = ? OR ca_c = ? OR ovpn_c = ? ORDER BY id"
        );
        let rows = sqlx::query_as::<_, Config>(&sql)
            .bind(credential_id)
            .bind(credential_id)
            .bind(credential_id)
            .bind(credential_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn create(&self, input: ConfigInput) -> Result<Config, VpnmuxError> {
        let cfg = Config {
            id: new_id(),
            name: input.name,
            host: input.host,
            user_cred: input.user_cred,
            pass_cred: input.pass_cred,
            ca_cred: input.ca_cred,
            ovpn_cred: input.ovpn_cred,
        };
        sqlx::query(
            r#"INSERT INTO config (id, name, host, user_c, pass_c, ca_c, ovpn_c)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&cfg.id)
        .bind(&cfg.name)
        .bind(&cfg.host)
        .bind(&cfg.user_cred)
        .bind(&cfg.pass_cred)
        .bind(&cfg.ca_cred)
        .bind(&cfg.ovpn_cred)
        .execute(&self.pool)
        .await?;
        Ok(cfg)
    }

    pub async fn update(&self, cfg: &Config) -> Result<(), VpnmuxError> {
        let result = sqlx::query(
            r#"UPDATE config SET name = ?, host = ?, user_c = ?, pass_c = ?, ca_c = ?, ovpn_c = ?
               WHERE id = ?"#,
        )
        .bind(&cfg.name)
        .bind(&cfg.host)
        .bind(&cfg.user_cred)
        .bind(&cfg.pass_cred)
        .bind(&cfg.ca_cred)
        .bind(&cfg.ovpn_cred)
        .bind(&cfg.id)
        .execute(&self.pool)
        .await?;
        expect_one(result, "config", &cfg.id)
    }

    pub async fn delete(&self, id: &str) -> Result<(), VpnmuxError> {
        let result = sqlx::query("DELETE FROM config WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_one(result, "config", id)
    }
}

#[derive(Clone)]
pub struct NetworkStore {
    pool: SqlitePool,
}

impl NetworkStore {
    pub async fn list(&self) -> Result<Vec<Network>, VpnmuxError> {
        let rows = sqlx::query_as::<_, Network>(
            "SELECT id, name, config_id FROM network ORDER BY name, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get(&self, id: &str) -> Result<Network, VpnmuxError> {
        sqlx::query_as::<_, Network>("SELECT id, name, config_id FROM network WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| VpnmuxError::not_found("network", id))
    }

    pub async fn using_config(&self, config_id: &str) -> Result<Vec<Network>, VpnmuxError> {
        let rows = sqlx::query_as::<_, Network>(
            "SELECT id, name, config_id FROM network WHERE config_id = ? ORDER BY id",
        )
        .bind(config_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn create(&self, input: NetworkInput) -> Result<Network, VpnmuxError> {
        let network = Network {
            id: new_id(),
            name: input.name,
            config_id: input.config_id,
        };
        sqlx::query("INSERT INTO network (id, name, config_id) VALUES (?, ?, ?)")
            .bind(&network.id)
            .bind(&network.name)
            .bind(&network.config_id)
            .execute(&self.pool)
            .await?;
        Ok(network)
    }

    pub async fn delete(&self, id: &str) -> Result<(), VpnmuxError> {
        let result = sqlx::query("DELETE FROM network WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_one(result, "network", id)
    }
}

#[derive(Clone)]
pub struct ClientStore {
    pool: SqlitePool,
}

impl ClientStore {
    pub async fn list(&self) -> Result<Vec<Client>, VpnmuxError> {
        let rows = sqlx::query_as::<_, Client>(
            "SELECT id, name, address FROM client ORDER BY name, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get(&self, id: &str) -> Result<Client, VpnmuxError> {
        sqlx::query_as::<_, Client>("SELECT id, name, address FROM client WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| VpnmuxError::not_found("client", id))
    }

    pub async fn create(&self, input: ClientInput) -> Result<Client, VpnmuxError> {
        let client = Client {
            id: new_id(),
            name: input.name,
            address: input.address,
        };
        sqlx::query("INSERT INTO client (id, name, address) VALUES (?, ?, ?)")
            .bind(&client.id)
            .bind(&client.name)
            .bind(&client.address)
            .execute(&self.pool)
            .await?;
        Ok(client)
    }

    pub async fn update(&self, client: &Client) -> Result<(), VpnmuxError> {
        let result = sqlx::query("UPDATE client SET name = ?, address = ? WHERE id = ?")
            .bind(&client.name)
            .bind(&client.address)
            .bind(&client.id)
            .execute(&self.pool)
            .await?;
        expect_one(result, "client", &client.id)
    }

    pub async fn delete(&self, id: &str) -> Result<(), VpnmuxError> {
        let result = sqlx::query("DELETE FROM client WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_one(result, "client", id)
    }
}

#[derive(Clone)]
pub struct ClientNetworkStore {
    pool: SqlitePool,
}

impl ClientNetworkStore {
    pub async fn list(&self) -> Result<Vec<ClientNetwork>, VpnmuxError> {
        let rows = sqlx::query_as::<_, ClientNetwork>(
            "SELECT client_id, network_id FROM client_network ORDER BY client_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get(&self, client_id: &str) -> Result<ClientNetwork, VpnmuxError> {
        sqlx::query_as::<_, ClientNetwork>(
            "SELECT client_id, network_id FROM client_network WHERE client_id = ?",
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| VpnmuxError::not_found("client network", client_id))
    }

    pub async fn for_network(&self, network_id: &str) -> Result<Vec<ClientNetwork>, VpnmuxError> {
        let rows = sqlx::query_as::<_, ClientNetwork>(
            "SELECT client_id, network_id FROM client_network WHERE network_id = ? ORDER BY client_id",
        )
        .bind(network_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Assign (or reassign) a client. Uses `INSERT ... ON CONFLICT(client_id) DO UPDATE`.
    pub async fn put(&self, assignment: &ClientNetwork) -> Result<(), VpnmuxError> {
        sqlx::query(
            r#"
            INSERT INTO client_network (client_id, network_id) VALUES (?, ?)
            ON CONFLICT(client_id) DO UPDATE SET network_id = excluded.network_id
            "#,
        )
        .bind(&assignment.client_id)
        .bind(&assignment.network_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, client_id: &str) -> Result<(), VpnmuxError> {
        let result = sqlx::query("DELETE FROM client_network WHERE client_id = ?")
            .bind(client_id)
            .execute(&self.pool)
            .await?;
        expect_one(result, "client network", client_id)
    }
}

#[derive(Clone)]
pub struct DnsStore {
    pool: SqlitePool,
}

impl DnsStore {
    /// The singleton DNS route. More than one row is a consistency error.
    pub async fn get(&self) -> Result<DnsRoute, VpnmuxError> {
        let mut rows = sqlx::query_as::<_, DnsRoute>("SELECT network_id FROM dns_route")
            .fetch_all(&self.pool)
            .await?;
        match rows.len() {
            0 => Err(VpnmuxError::not_found("dns route", "default")),
            1 => Ok(rows.remove(0)),
            n => Err(VpnmuxError::Consistency(format!(
                "dns_route holds {n} rows, expected at most one"
            ))),
        }
    }

    pub async fn put(&self, route: &DnsRoute) -> Result<(), VpnmuxError> {
        sqlx::query(
            r#"
            INSERT INTO dns_route (id, network_id) VALUES (0, ?)
            ON CONFLICT(id) DO UPDATE SET network_id = excluded.network_id
            "#,
        )
        .bind(&route.network_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self) -> Result<(), VpnmuxError> {
        let result = sqlx::query("DELETE FROM dns_route")
            .execute(&self.pool)
            .await?;
        expect_one(result, "dns route", "default")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn storage() -> Storage {
        Storage::in_memory().await.unwrap()
    }

    async fn credential(storage: &Storage, name: &str) -> Credential {
        storage
            .credentials()
            .create(CredentialInput {
                name: name.into(),
                value: format!("{name}-secret"),
            })
            .await
            .unwrap()
    }

    async fn config(storage: &Storage) -> Config {
        let user = credential(storage, "user").await;
        let pass = credential(storage, "pass").await;
        let ca = credential(storage, "ca").await;
        let tls = credential(storage, "tls").await;
        storage
            .configs()
            .create(ConfigInput {
                name: "provider".into(),
                host: "vpn.example.net".into(),
                user_cred: user.id,
                pass_cred: pass.id,
                ca_cred: ca.id,
                ovpn_cred: tls.id,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn crud_cycle_reports_not_found() {
        let storage = storage().await;
        let store = storage.credentials();

        let mut cred = credential(&storage, "user").await;
        assert_eq!(store.get(&cred.id).await.unwrap(), cred);

        cred.value = "rotated".into();
        store.update(&cred).await.unwrap();
        assert_eq!(store.get(&cred.id).await.unwrap().value, "rotated");

        store.delete(&cred.id).await.unwrap();
        assert!(store.get(&cred.id).await.unwrap_err().is_not_found());
        assert!(store.delete(&cred.id).await.unwrap_err().is_not_found());
        assert!(store.update(&cred).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn config_reference_queries() {
        let storage = storage().await;
        let cfg = config(&storage).await;

        let referencing = storage.configs().referencing(&cfg.ca_cred).await.unwrap();
        assert_eq!(referencing, vec![cfg.clone()]);
        assert!(storage.configs().referencing("other").await.unwrap().is_empty());

        let network = storage
            .networks()
            .create(NetworkInput {
                name: "n".into(),
                config_id: cfg.id.clone(),
            })
            .await
            .unwrap();
        assert_eq!(
            storage.networks().using_config(&cfg.id).await.unwrap(),
            vec![network]
        );
    }

    #[tokio::test]
    async fn client_assignment_is_an_upsert() {
        let storage = storage().await;
        let cfg = config(&storage).await;
        let mut networks = Vec::new();
        for name in ["a", "b"] {
            networks.push(
                storage
                    .networks()
                    .create(NetworkInput {
                        name: name.into(),
                        config_id: cfg.id.clone(),
                    })
                    .await
                    .unwrap(),
            );
        }
        let client = storage
            .clients()
            .create(ClientInput {
                name: "laptop".into(),
                address: "10.0.0.5".into(),
            })
            .await
            .unwrap();

        let store = storage.client_networks();
        for network in &networks {
            store
                .put(&ClientNetwork {
                    client_id: client.id.clone(),
                    network_id: network.id.clone(),
                })
                .await
                .unwrap();
        }

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].network_id, networks[1].id);
        assert!(store.for_network(&networks[0].id).await.unwrap().is_empty());

        store.delete(&client.id).await.unwrap();
        assert!(store.get(&client.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn dns_route_is_a_singleton() {
        let storage = storage().await;
        let cfg = config(&storage).await;
        let dns = storage.dns();
        assert!(dns.get().await.unwrap_err().is_not_found());

        for name in ["a", "b"] {
            let network = storage
                .networks()
                .create(NetworkInput {
                    name: name.into(),
                    config_id: cfg.id.clone(),
                })
                .await
                .unwrap();
            dns.put(&DnsRoute {
                network_id: network.id.clone(),
            })
            .await
            .unwrap();
            assert_eq!(dns.get().await.unwrap().network_id, network.id);
        }

        dns.delete().await.unwrap();
        assert!(dns.delete().await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn duplicate_client_address_is_rejected() {
        let storage = storage().await;
        let input = ClientInput {
            name: "laptop".into(),
            address: "10.0.0.5".into(),
        };
        storage.clients().create(input.clone()).await.unwrap();
        let err = storage.clients().create(input).await.unwrap_err();
        assert!(matches!(err, VpnmuxError::DatabaseError(_)));
    }
}
