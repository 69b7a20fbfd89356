//! Loaded project: config file, catalog and the wiring to the engine

use crate::catalog;
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use stratoflow_config::ProjectConfig;
use stratoflow_engine::{
    BackoffPolicy, DesiredConfig, FileStateStore, Orchestrator, ResourceAddress,
    ResourceDefinition, Timeouts, parse_config,
};
use stratoflow_remote_http::{HttpRemote, HttpRemoteConfig};

pub type ProjectOrchestrator = Orchestrator<HttpRemote, FileStateStore>;

/// One resource declared in the config file
#[derive(Debug, Clone)]
pub struct Declared {
    pub address: ResourceAddress,
    pub definition: Arc<ResourceDefinition>,
    pub desired: DesiredConfig,
}

pub struct Project {
    pub config_path: PathBuf,
    pub config: ProjectConfig,
    pub state_dir: PathBuf,
    definitions: Vec<Arc<ResourceDefinition>>,
}

impl Project {
    /// Load the config at `explicit`, or discover it
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let config_path = match explicit {
            Some(path) => path.to_path_buf(),
            None => stratoflow_config::find_config_file()?,
        };
        let config = stratoflow_config::load(&config_path)
            .with_context(|| format!("failed to load {}", config_path.display()))?;
        let state_dir = config.state_dir_for(&config_path);

        let timeouts = timeouts(&config);
        let definitions = catalog::builtin()?
            .into_iter()
            .map(|d| Arc::new(d.timeouts(timeouts)))
            .collect();

        tracing::debug!("Loaded {}", config_path.display());
        Ok(Self {
            config_path,
            config,
            state_dir,
            definitions,
        })
    }

    pub fn definition(&self, type_name: &str) -> anyhow::Result<Arc<ResourceDefinition>> {
        self.definitions
            .iter()
            .find(|d| d.type_name() == type_name)
            .cloned()
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "unknown resource type '{}' (see `strato catalog`)",
                    type_name
                )
            })
    }

    /// Declared resources, optionally narrowed to one `type.name`
    pub fn declared(&self, target: Option<&str>) -> anyhow::Result<Vec<Declared>> {
        let mut out = Vec::new();
        for resource in &self.config.resources {
            let address = ResourceAddress::new(&resource.resource_type, &resource.name);
            if target.is_some_and(|t| t != address.to_string()) {
                continue;
            }
            let definition = self.definition(&resource.resource_type)?;
            let desired = parse_config(&resource.config, &definition.schema)
                .with_context(|| format!("invalid config for {}", address))?;
            out.push(Declared {
                address,
                definition,
                desired,
            });
        }

        if let Some(target) = target {
            if out.is_empty() {
                anyhow::bail!("{} is not declared in {}", target, self.config_path.display());
            }
        }
        Ok(out)
    }

    pub fn backoff(&self) -> BackoffPolicy {
        let retry = &self.config.retry;
        BackoffPolicy {
            initial_delay: Duration::from_millis(retry.initial_delay_ms),
            max_delay: Duration::from_millis(retry.max_delay_ms),
            multiplier: retry.multiplier,
            jitter: retry.jitter,
        }
    }

    pub fn store(&self) -> FileStateStore {
        FileStateStore::new(&self.state_dir)
    }

    /// HTTP remote authenticated with the token from `token_env`
    pub fn remote(&self) -> anyhow::Result<HttpRemote> {
        let token = std::env::var(&self.config.token_env).with_context(|| {
            format!(
                "API token not set: export {} before talking to the remote",
                self.config.token_env
            )
        })?;
        let remote = HttpRemote::new(HttpRemoteConfig {
            endpoint: self.config.endpoint.clone(),
            region: self.config.region.clone(),
            token,
            requests_per_second: self.config.rate_limit.requests_per_second,
        })?;
        Ok(remote)
    }

    pub fn orchestrator(&self) -> anyhow::Result<ProjectOrchestrator> {
        let owner = self
            .config_path
            .parent()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "stratoflow".to_string());

        Ok(
            Orchestrator::new(Arc::new(self.remote()?), Arc::new(self.store()))
                .with_backoff(self.backoff())
                .with_owner(owner),
        )
    }
}

fn timeouts(config: &ProjectConfig) -> Timeouts {
    let t = &config.timeouts;
    Timeouts {
        create: Duration::from_secs(t.create),
        read: Duration::from_secs(t.read),
        update: Duration::from_secs(t.update),
        delete: Duration::from_secs(t.delete),
        poll: Duration::from_secs(t.poll),
    }
}
