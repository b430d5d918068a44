//! Configuration, store and registry shared by every command

use depot_repo::{DepotConfig, RepositoryRegistry, SqliteStore, Store};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;

pub struct Context {
    pub config: DepotConfig,
    config_path: PathBuf,
    pub registry: RepositoryRegistry,
}

impl Context {
    /// Load the configuration and open the local store
    pub fn load(config: Option<&Path>, store: Option<&Path>) -> Result<Self> {
        let config_path = match config {
            Some(path) => path.to_path_buf(),
            None => DepotConfig::default_path()?,
        };
        let config = if config_path.exists() {
            DepotConfig::load_from(&config_path)?
        } else {
            tracing::debug!(path = %config_path.display(), "no configuration file, starting empty");
            DepotConfig::default()
        };

        let store: Arc<dyn Store> = Arc::new(match store {
            Some(path) => SqliteStore::open_at(path)?,
            None => SqliteStore::open("store")?,
        });
        let registry = RepositoryRegistry::from_config(&config, store)?;

        Ok(Self {
            config,
            config_path,
            registry,
        })
    }

    /// Persist the configuration where it was loaded from
    pub fn save_config(&self) -> Result<()> {
        self.config.save_to(&self.config_path)?;
        tracing::debug!(path = %self.config_path.display(), "configuration saved");
        Ok(())
    }
}
