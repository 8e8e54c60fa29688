use async_trait::async_trait;
use dashmap::DashMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid value `{value}` for {key}: {reason}")]
    Invalid { key: String, value: String, reason: String },
}

#[async_trait::async_trait]
#[typetag::serde]
pub trait ConfigManagerType: Send + Sync {
    async fn as_vec(&self) -> Vec<(String, String)> {
        let mut config = vec![];
        for key in self.keys().await {
            if let Some(value) = self.get(&key).await {
                config.push((key, value));
            }
        }
        config
    }
    async fn keys(&self) -> Vec<String>;
    async fn get(&self, key: &str) -> Option<String>;
    async fn del(&self, key: &str) -> Result<(), ConfigError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), ConfigError>;
    fn clone_box(&self) -> Box<dyn ConfigManagerType>;
    fn debug_box(&self) -> String;
}

#[derive(Serialize, Deserialize)]
pub struct ConfigManager(pub Box<dyn ConfigManagerType>);

impl ConfigManager {
    pub fn into_inner(self) -> Box<dyn ConfigManagerType> {
        self.0
    }
}

impl Clone for ConfigManager {
    fn clone(&self) -> Self {
        ConfigManager(self.0.clone_box())
    }
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.debug_box())
    }
}

/// Process environment, seeded from (and written back to) a `.env` file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvConfigManager {
    env_file: PathBuf,
}

impl EnvConfigManager {
    pub fn new(env_file: PathBuf) -> Box<Self> {
        if env_file.exists() {
            match dotenvy::from_path(&env_file) {
                Ok(()) => info!("Loaded .env from {}", env_file.display()),
                Err(err) => warn!("could not parse {}: {err}", env_file.display()),
            }
        } else {
            info!("no .env at {}, using the process environment", env_file.display());
        }

        Box::new(Self { env_file })
    }

    // Rewrites the .env file with `key` replaced (Some) or removed (None).
    fn rewrite(&self, key: &str, value: Option<&str>) -> Result<(), ConfigError> {
        let content = fs::read_to_string(&self.env_file).unwrap_or_default();
        let mut lines: Vec<String> = Vec::new();
        let mut found = false;

        for line in content.lines() {
            match line.split_once('=') {
                Some((k, _)) if k.trim() == key => {
                    found = true;
                    if let Some(value) = value {
                        lines.push(format!("{key}={value}"));
                    }
                }
                _ => lines.push(line.to_string()),
            }
        }
        if !found {
            match value {
                Some(value) => lines.push(format!("{key}={value}")),
                None => return Ok(()),
            }
        }

        fs::write(&self.env_file, lines.join("\n")).map_err(|source| ConfigError::Write {
            path: self.env_file.clone(),
            source,
        })
    }
}

#[typetag::serde]
#[async_trait]
impl ConfigManagerType for EnvConfigManager {
    async fn keys(&self) -> Vec<String> {
        env::vars().map(|(k, _)| k).collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        unsafe {
            env::set_var(key, value);
        };
        self.rewrite(key, Some(value))
    }

    async fn del(&self, key: &str) -> Result<(), ConfigError> {
        unsafe {
            env::remove_var(key);
        };
        self.rewrite(key, None)
    }

    fn clone_box(&self) -> Box<dyn ConfigManagerType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        format!("EnvConfigManager({})", self.env_file.display())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct MapConfigManager {
    #[schemars(with = "std::collections::HashMap<String, String>")]
    map: DashMap<String, String>,
}

impl MapConfigManager {
    pub fn new() -> Box<Self> {
        Box::new(Self::default())
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Box<Self> {
        let map = pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Box::new(Self { map })
    }
}

#[typetag::serde]
#[async_trait]
impl ConfigManagerType for MapConfigManager {
    async fn keys(&self) -> Vec<String> {
        self.map.iter().map(|entry| entry.key().clone()).collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).map(|v| v.clone())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), ConfigError> {
        self.map.remove(key);
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn ConfigManagerType> {
        Box::new(self.clone())
    }
    fn debug_box(&self) -> String {
        format!("MapConfigManager({} entries)", self.map.len())
    }
}

/// Broker settings read from the config manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BrokerConfig {
    /// Key of the push context shared by every service of the built-in
    /// cluster.
    pub push_service_name: String,
    /// Cluster whose services share one push context.
    pub builtin_cluster: String,
    /// Requests handled concurrently.
    pub max_workers: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            push_service_name: "tizen-push".to_string(),
            builtin_cluster: "tizen".to_string(),
            max_workers: 4,
        }
    }
}

impl BrokerConfig {
    pub const PUSH_SERVICE_NAME: &'static str = "SERVICE_ADAPTOR_PUSH_SERVICE_NAME";
    pub const BUILTIN_CLUSTER: &'static str = "SERVICE_ADAPTOR_BUILTIN_CLUSTER";
    pub const MAX_WORKERS: &'static str = "SERVICE_ADAPTOR_MAX_WORKERS";

    /// Read the broker keys, falling back to defaults for missing ones.
    pub async fn load(config: &ConfigManager) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let push_service_name = config
            .0
            .get(Self::PUSH_SERVICE_NAME)
            .await
            .unwrap_or(defaults.push_service_name);
        let builtin_cluster = config
            .0
            .get(Self::BUILTIN_CLUSTER)
            .await
            .unwrap_or(defaults.builtin_cluster);
        let max_workers = match config.0.get(Self::MAX_WORKERS).await {
            None => defaults.max_workers,
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(0) => {
                    return Err(ConfigError::Invalid {
                        key: Self::MAX_WORKERS.into(),
                        value: raw,
                        reason: "must be at least 1".into(),
                    });
                }
                Ok(n) => n,
                Err(err) => {
                    return Err(ConfigError::Invalid {
                        key: Self::MAX_WORKERS.into(),
                        value: raw,
                        reason: err.to_string(),
                    });
                }
            },
        };

        Ok(Self {
            push_service_name,
            builtin_cluster,
            max_workers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::write;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_map_config_manager_basic() {
        let mgr = MapConfigManager::new();

        mgr.set("foo", "bar").await.unwrap();
        assert_eq!(mgr.get("foo").await, Some("bar".to_string()));

        mgr.set("foo", "baz").await.unwrap();
        assert_eq!(mgr.get("foo").await, Some("baz".to_string()));

        let keys = mgr.keys().await;
        assert_eq!(keys, vec!["foo".to_string()]);

        mgr.del("foo").await.unwrap();
        assert_eq!(mgr.get("foo").await, None);
    }

    #[tokio::test]
    async fn test_env_config_manager_rewrites_file() {
        let dir = tempdir().unwrap();
        let env_file = dir.path().join(".env");
        write(&env_file, "SA_TEST_KEEP=1\nSA_TEST_REWRITE=old").unwrap();

        let mgr = EnvConfigManager::new(env_file.clone());
        assert_eq!(mgr.get("SA_TEST_REWRITE").await, Some("old".to_string()));

        mgr.set("SA_TEST_REWRITE", "new").await.unwrap();
        mgr.set("SA_TEST_ADDED", "2").await.unwrap();
        let content = fs::read_to_string(&env_file).unwrap();
        assert_eq!(content, "SA_TEST_KEEP=1\nSA_TEST_REWRITE=new\nSA_TEST_ADDED=2");

        mgr.del("SA_TEST_REWRITE").await.unwrap();
        let content = fs::read_to_string(&env_file).unwrap();
        assert_eq!(content, "SA_TEST_KEEP=1\nSA_TEST_ADDED=2");
        assert_eq!(mgr.get("SA_TEST_REWRITE").await, None);

        mgr.del("SA_TEST_KEEP").await.unwrap();
        mgr.del("SA_TEST_ADDED").await.unwrap();
    }

    #[tokio::test]
    async fn broker_config_defaults_and_overrides() {
        let empty = ConfigManager(MapConfigManager::new());
        assert_eq!(BrokerConfig::load(&empty).await.unwrap(), BrokerConfig::default());

        let config = ConfigManager(MapConfigManager::from_pairs([
            (BrokerConfig::PUSH_SERVICE_NAME, "shared-push"),
            (BrokerConfig::MAX_WORKERS, "8"),
        ]));
        let loaded = BrokerConfig::load(&config).await.unwrap();
        assert_eq!(loaded.push_service_name, "shared-push");
        assert_eq!(loaded.builtin_cluster, "tizen");
        assert_eq!(loaded.max_workers, 8);
    }

    #[tokio::test]
    async fn broker_config_rejects_bad_worker_counts() {
        for raw in ["0", "many"] {
            let config = ConfigManager(MapConfigManager::from_pairs([(BrokerConfig::MAX_WORKERS, raw)]));
            assert!(matches!(
                BrokerConfig::load(&config).await,
                Err(ConfigError::Invalid { .. })
            ));
        }
    }

    #[test]
    fn config_manager_round_trips_through_typetag() {
        let config = ConfigManager(MapConfigManager::from_pairs([("a", "1")]));
        let text = serde_json::to_string(&config).unwrap();
        let back: ConfigManager = serde_json::from_str(&text).unwrap();
        assert_eq!(format!("{back:?}"), "MapConfigManager(1 entries)");
    }
}
