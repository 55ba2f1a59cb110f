//! Backend selection read from the environment.

use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::enrollment_store::{EnrollmentBackend, InMemoryEnrollmentStore, PostgresEnrollmentStore};

pub const STORE_VAR: &str = "CLASSHUB_STORE";
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";
pub const MAX_CONNECTIONS_VAR: &str = "CLASSHUB_DB_MAX_CONNECTIONS";

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Postgres { database_url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfraConfig {
    pub store: StoreKind,
    pub max_connections: u32,
}

impl Default for InfraConfig {
    fn default() -> Self {
        Self {
            store: StoreKind::Memory,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl InfraConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup (process env, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let store = match lookup(STORE_VAR).as_deref().map(str::trim) {
            None | Some("") | Some("memory") => StoreKind::Memory,
            Some("postgres") => {
                let database_url = lookup(DATABASE_URL_VAR)
                    .filter(|url| !url.trim().is_empty())
                    .ok_or_else(|| anyhow!("{DATABASE_URL_VAR} must be set when {STORE_VAR}=postgres"))?;
                StoreKind::Postgres { database_url }
            }
            Some(other) => bail!("unknown {STORE_VAR} '{other}' (expected 'memory' or 'postgres')"),
        };

        let max_connections = match lookup(MAX_CONNECTIONS_VAR) {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .with_context(|| format!("{MAX_CONNECTIONS_VAR} must be a positive integer, got '{raw}'"))?,
            None => DEFAULT_MAX_CONNECTIONS,
        };
        if max_connections == 0 {
            bail!("{MAX_CONNECTIONS_VAR} must be at least 1");
        }

        Ok(Self { store, max_connections })
    }
}

/// Open a Postgres pool and apply the schema.
pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<PostgresEnrollmentStore> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to postgres")?;
    let store = PostgresEnrollmentStore::new(pool);
    store.migrate().await.context("failed to apply migrations")?;
    Ok(store)
}

/// Construct the configured backend.
pub async fn build_store(config: &InfraConfig) -> anyhow::Result<Arc<dyn EnrollmentBackend>> {
    match &config.store {
        StoreKind::Memory => {
            info!(store = "memory", "enrollment store ready");
            Ok(Arc::new(InMemoryEnrollmentStore::new()))
        }
        StoreKind::Postgres { database_url } => {
            let store = connect(database_url, config.max_connections).await?;
            info!(
                store = "postgres",
                max_connections = config.max_connections,
                "enrollment store ready"
            );
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::enrollment_store::ClassDirectory;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_to_memory() {
        let config = InfraConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, InfraConfig::default());
    }

    #[test]
    fn postgres_requires_database_url() {
        let err = InfraConfig::from_lookup(lookup(&[(STORE_VAR, "postgres")])).unwrap_err();
        assert!(err.to_string().contains(DATABASE_URL_VAR));
    }

    #[test]
    fn reads_postgres_settings() {
        let config = InfraConfig::from_lookup(lookup(&[
            (STORE_VAR, "postgres"),
            (DATABASE_URL_VAR, "postgres://localhost/classhub"),
            (MAX_CONNECTIONS_VAR, "12"),
        ]))
        .unwrap();
        assert_eq!(
            config.store,
            StoreKind::Postgres {
                database_url: "postgres://localhost/classhub".to_string()
            }
        );
        assert_eq!(config.max_connections, 12);
    }

    #[test]
    fn rejects_unknown_store_and_bad_pool_size() {
        assert!(InfraConfig::from_lookup(lookup(&[(STORE_VAR, "redis")])).is_err());
        assert!(InfraConfig::from_lookup(lookup(&[(MAX_CONNECTIONS_VAR, "lots")])).is_err());
        assert!(InfraConfig::from_lookup(lookup(&[(MAX_CONNECTIONS_VAR, "0")])).is_err());
    }

    #[tokio::test]
    async fn builds_memory_store() {
        let store = build_store(&InfraConfig::default()).await.unwrap();
        assert!(store.list_classes().await.unwrap().is_empty());
    }
}
