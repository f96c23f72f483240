//! Configuration file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::{ProxyConfig, RuleSetConfig};
use crate::throttle::{RuleSetId, Throttler};

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<ProxyConfig>,
}

impl ConfigWatcher {
    /// Create a new ConfigWatcher.
    ///
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<ProxyConfig>) {
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
    /// The returned watcher must be kept alive for events to flow.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!("Config file change detected, reloading...");
                        match load_config(&path) {
                            Ok(new_config) => {
                                let _ = tx.send(new_config);
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "Failed to reload config. Keeping current configuration.");
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

/// Apply throttle settings from `config` to the running scheduler.
///
/// Rule sets are matched by position; reloads go through
/// [`reconcile_rule_sets`] first so positions stay stable.
pub fn apply_throttle(config: &ProxyConfig, throttler: &Throttler) {
    throttler.set_burst_interval_ms(config.throttle.burst_interval_ms);
    for (index, rule_set) in config.throttle.rule_sets.iter().enumerate() {
        if let Err(e) = throttler.set_bytes_per_second(RuleSetId(index), rule_set.bytes_per_second) {
            tracing::warn!(rule_set = %rule_set.name, error = %e, "Rule set requires restart to add");
        }
    }
}

/// Keep the running rule set layout while taking budgets from `next` by name.
///
/// Scheduler slots are assigned at startup, so renamed, added or reordered
/// sets cannot move. A set missing from `next` becomes unthrottled.
pub fn reconcile_rule_sets(current: &ProxyConfig, mut next: ProxyConfig) -> ProxyConfig {
    let running = &current.throttle.rule_sets;
    let same_layout = running.len() == next.throttle.rule_sets.len()
        && running.iter().zip(&next.throttle.rule_sets).all(|(a, b)| a.name == b.name);
    if same_layout {
        return next;
    }

    for added in next.throttle.rule_sets.iter().filter(|r| current.throttle.index_of(&r.name).is_none()) {
        tracing::warn!(rule_set = %added.name, "Rule set requires restart to add");
    }
    let rule_sets = running
        .iter()
        .map(|slot| {
            let bytes_per_second = match next.throttle.rule_sets.iter().find(|r| r.name == slot.name) {
                Some(r) => r.bytes_per_second,
                None => {
                    tracing::warn!(rule_set = %slot.name, "Rule set removed from config; now unthrottled");
                    0
                }
            };
            RuleSetConfig {
                name: slot.name.clone(),
                bytes_per_second,
            }
        })
        .collect();
    next.throttle.rule_sets = rule_sets;
    next
}

/// Consume reloaded configs: update the throttler, then publish the new config.
pub async fn apply_updates(
    mut updates: mpsc::UnboundedReceiver<ProxyConfig>,
    shared: Arc<ArcSwap<ProxyConfig>>,
    throttler: Throttler,
) {
    while let Some(config) = updates.recv().await {
        let current = shared.load_full();
        if config.listener.bind_address != current.listener.bind_address {
            tracing::warn!("listener.bind_address changes take effect after restart");
        }
        let config = reconcile_rule_sets(&current, config);
        apply_throttle(&config, &throttler);
        shared.store(Arc::new(config));
        tracing::info!("Configuration reloaded");
    }
}
