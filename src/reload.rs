//! Background jobs
//!
//! Long-running loops around the [`Registry`]:
//!
//! - periodic config reload every `onchain.reload_cycle_secs`
//! - gateway file watcher (mtime polling) feeding [`Registry::apply_gateway_configs`]
//! - gateway reorder by block height every `adjust_gateway_interval_secs`
//! - on-demand reload on `SIGUSR1` (unix only)
//!
//! Every loop stops when the shared `watch` shutdown flag flips to `true`.

use crate::config::{load_gateway_configs, RouterConfig};
use crate::registry::Registry;
use eyre::{Result, WrapErr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Attempts per periodic reload before waiting for the next cycle
pub const RELOAD_ATTEMPTS: u32 = 3;

/// Polling interval of the gateway file watcher
pub const GATEWAY_WATCH_INTERVAL: Duration = Duration::from_secs(5);

const RELOAD_RETRY_DELAY: Duration = Duration::from_secs(1);

// ============================================================================
// Task handle
// ============================================================================

/// Running background jobs and their shutdown switch
pub struct BackgroundTasks {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// A receiver for jobs spawned outside this module
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Signal every loop and wait for them to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        info!("Background tasks stopped");
    }
}

/// Spawn every background job the config asks for
pub fn spawn_background_tasks(registry: Arc<Registry>, config: &RouterConfig) -> BackgroundTasks {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::new();

    if config.onchain.reload_cycle_secs > 0 {
        let cycle = Duration::from_secs(config.onchain.reload_cycle_secs);
        handles.push(tokio::spawn(run_periodic_reload(
            registry.clone(),
            cycle,
            shutdown_rx.clone(),
        )));
    }

    if let Some(path) = &config.gateway_config_file {
        handles.push(tokio::spawn(run_gateway_file_watcher(
            registry.clone(),
            path.clone(),
            GATEWAY_WATCH_INTERVAL,
            shutdown_rx.clone(),
        )));
    }

    let adjust = Duration::from_secs(config.extra.adjust_gateway_interval_secs.max(1));
    handles.push(tokio::spawn(run_gateway_adjuster(
        registry.clone(),
        adjust,
        shutdown_rx.clone(),
    )));

    #[cfg(unix)]
    handles.push(tokio::spawn(run_reload_on_signal(registry, shutdown_rx)));

    info!(tasks = handles.len(), "Background tasks started");
    BackgroundTasks { shutdown_tx, handles }
}

// ============================================================================
// Config reload
// ============================================================================

/// Reload with up to `attempts` tries; true once a reload fully applied
pub async fn reload_with_retry(registry: &Arc<Registry>, attempts: u32, shutdown: &watch::Receiver<bool>) -> bool {
    for attempt in 1..=attempts.max(1) {
        if *shutdown.borrow() {
            return false;
        }
        if registry.reload().await {
            return true;
        }
        warn!(attempt = attempt, max_attempts = attempts, "[reload] reload router config failed");
        if attempt < attempts {
            tokio::time::sleep(RELOAD_RETRY_DELAY).await;
        }
    }
    false
}

/// Reload the registry every `cycle` until shutdown
pub async fn run_periodic_reload(registry: Arc<Registry>, cycle: Duration, mut shutdown: watch::Receiver<bool>) {
    info!(cycle_secs = cycle.as_secs(), "Start periodic config reload");
    let mut interval = tokio::time::interval(cycle);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // the first tick fires immediately; init already loaded the config
    interval.tick().await;

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Periodic config reload shutdown");
                    break;
                }
            }
            _ = interval.tick() => {
                if !reload_with_retry(&registry, RELOAD_ATTEMPTS, &shutdown).await {
                    error!("[reload] periodic reload gave up until next cycle");
                }
            }
        }
    }
}

// ============================================================================
// Gateway file watcher
// ============================================================================

fn modified_time(path: &Path) -> Result<SystemTime> {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .wrap_err_with(|| format!("Failed to stat gateway config {}", path.display()))
}

/// Re-read the gateway file and hand every chain's endpoints to the registry
pub async fn reload_gateway_file(registry: &Registry, path: &Path) -> Result<usize> {
    let gateways = load_gateway_configs(path)?;
    let updated = registry.apply_gateway_configs(gateways).await;
    info!(path = %path.display(), updated = updated, "Gateway config file reloaded");
    Ok(updated)
}

/// Poll the gateway file's mtime and apply it whenever it changes
///
/// A file that fails to parse leaves the running gateways untouched.
pub async fn run_gateway_file_watcher(
    registry: Arc<Registry>,
    path: PathBuf,
    poll: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(path = %path.display(), "Start gateway config watcher");
    let mut last_modified = match modified_time(&path) {
        Ok(time) => Some(time),
        Err(e) => {
            warn!(error = %e, "Gateway config not readable yet");
            None
        }
    };
    let mut interval = tokio::time::interval(poll);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Gateway config watcher shutdown");
                    break;
                }
            }
            _ = interval.tick() => {
                let modified = match modified_time(&path) {
                    Ok(time) => time,
                    Err(e) => {
                        debug!(error = %e, "Gateway config stat failed");
                        continue;
                    }
                };
                if last_modified == Some(modified) {
                    continue;
                }
                last_modified = Some(modified);
                if let Err(e) = reload_gateway_file(&registry, &path).await {
                    error!(path = %path.display(), error = %e, "Reload gateway config failed");
                }
            }
        }
    }
}

// ============================================================================
// Gateway reorder
// ============================================================================

/// Reorder every bridge's endpoints once
pub async fn adjust_all_gateways(registry: &Registry, shutdown: &watch::Receiver<bool>) {
    for (chain_id, bridge) in registry.bridges().await {
        if *shutdown.borrow() {
            return;
        }
        debug!(chain_id = %chain_id, "Adjust gateway order");
        registry.adjust_gateway_order(&bridge, shutdown).await;
    }
}

pub async fn run_gateway_adjuster(registry: Arc<Registry>, every: Duration, mut shutdown: watch::Receiver<bool>) {
    info!(interval_secs = every.as_secs(), "Start gateway adjust job");
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Gateway adjust job shutdown");
                    break;
                }
            }
            _ = interval.tick() => {
                adjust_all_gateways(&registry, &shutdown).await;
            }
        }
    }
}

// ============================================================================
// Signal-driven reload
// ============================================================================

/// Reload on every `SIGUSR1`
#[cfg(unix)]
pub async fn run_reload_on_signal(registry: Arc<Registry>, mut shutdown: watch::Receiver<bool>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut usr1 = match signal(SignalKind::user_defined1()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGUSR1 handler, signal reload disabled");
            return;
        }
    };

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            received = usr1.recv() => {
                if received.is_none() {
                    break;
                }
                info!("Received SIGUSR1, reloading router config");
                if !registry.reload().await {
                    error!("[reload] signal-triggered reload did not fully apply");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modified_time_of_missing_file() {
        let err = modified_time(Path::new("/nonexistent/gateways.toml")).unwrap_err();
        assert!(err.to_string().contains("gateways.toml"));
    }

    #[test]
    fn test_modified_time_of_existing_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(modified_time(file.path()).is_ok());
    }
}
