//! Configuration file watcher for credential and policy reload.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::authn::TokenAuthenticator;
use crate::authz::PolicyAuthorizer;
use crate::config::loader::load_config;
use crate::config::schema::ServerConfig;

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<ServerConfig>,
}

impl ConfigWatcher {
    /// Create a new ConfigWatcher.
    ///
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<ServerConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file in a background thread.
    ///
    /// The returned watcher must be kept alive for events to keep flowing.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!("Config file change detected, reloading");
                        match load_config(&path) {
                            Ok(new_config) => {
                                let _ = tx.send(new_config);
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
                            }
                        }
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

/// Components whose state follows the config file.
#[derive(Clone, Default)]
pub struct ReloadTargets {
    pub tokens: Option<Arc<TokenAuthenticator>>,
    pub policy: Option<Arc<PolicyAuthorizer>>,
}

impl ReloadTargets {
    /// Push the reloadable parts of `config` into the live components.
    pub fn apply(&self, config: &ServerConfig) {
        if let Some(tokens) = &self.tokens {
            tokens.replace(&config.authentication.tokens);
        }
        if let Some(policy) = &self.policy {
            policy.replace(config.authorization.policy.clone());
        }
    }
}

/// Apply every update from `updates` until the channel closes.
pub async fn run_reloader(mut updates: mpsc::UnboundedReceiver<ServerConfig>, targets: ReloadTargets) {
    while let Some(config) = updates.recv().await {
        targets.apply(&config);
    }
    tracing::debug!("Config reloader stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{PolicyRuleConfig, TokenConfig};

    #[tokio::test]
    async fn test_reloader_applies_updates() {
        let tokens = Arc::new(TokenAuthenticator::from_config(&[]));
        let policy = Arc::new(PolicyAuthorizer::new(vec![]));
        let targets = ReloadTargets {
            tokens: Some(tokens.clone()),
            policy: Some(policy.clone()),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let mut config = ServerConfig::default();
        config.authentication.tokens = vec![TokenConfig {
            token: "t".into(),
            user: "u".into(),
            ..Default::default()
        }];
        config.authorization.policy = vec![PolicyRuleConfig {
            user: Some("u".into()),
            resources: vec!["*".into()],
            ..Default::default()
        }];
        tx.send(config).unwrap();
        drop(tx);

        run_reloader(rx, targets).await;
        assert_eq!(tokens.len(), 1);
    }
}
