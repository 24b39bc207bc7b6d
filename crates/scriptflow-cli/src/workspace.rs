use anyhow::{anyhow, Context, Result};
use scriptflow_core::config::Config;
use scriptflow_core::store::{self, Datastore};
use std::path::Path;
use std::sync::Arc;

/// Everything a command needs: resolved configuration and the acting user.
pub struct Workspace {
    pub config: Config,
    user: Option<String>,
}

impl Workspace {
    /// Load configuration from `path` (or `./scriptflow.yaml`) and the
    /// process environment.
    pub fn load(path: Option<&Path>, user: Option<String>) -> Result<Self> {
        let config = Config::load(path, |key| std::env::var(key).ok())
            .context("failed to load configuration")?;
        Ok(Self::new(config, user))
    }

    pub fn new(config: Config, user: Option<String>) -> Self {
        Self {
            config,
            user: user.filter(|u| !u.trim().is_empty()),
        }
    }

    pub fn user(&self) -> Result<&str> {
        self.user
            .as_deref()
            .ok_or_else(|| anyhow!("no user id: pass --user or set SCRIPTFLOW_USER"))
    }

    pub fn store(&self, client: reqwest::Client) -> Result<Arc<dyn Datastore>> {
        store::open(&self.config.datastore, client).context("failed to open datastore")
    }

    /// Open the datastore and run `f` against it on a fresh runtime.
    pub fn block_on<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn Datastore>, reqwest::Client) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let rt = tokio::runtime::Runtime::new()?;
        let client = reqwest::Client::new();
        let store = self.store(client.clone())?;
        rt.block_on(f(store, client))
    }
}
