// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Background strategies that keep a [`ServiceRegistry`] current.
//!
//! Polling and event subscription are alternatives: exactly one strategy runs
//! per process, picked from configuration at startup.

use crate::discovery::ServiceRegistry;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, sleep, MissedTickBehavior};

#[async_trait]
pub trait RefreshStrategy: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Run until `shutdown` flips to `true` (or its sender is dropped).
    async fn run(&self, registry: Arc<ServiceRegistry>, shutdown: watch::Receiver<bool>);
}

/// Spawn `strategy` on the runtime.
pub fn spawn(
    strategy: Arc<dyn RefreshStrategy>,
    registry: Arc<ServiceRegistry>,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(strategy = strategy.name(), "Starting registry refresh");
        strategy.run(registry, shutdown).await;
        tracing::info!(strategy = strategy.name(), "Registry refresh stopped");
    })
}

/// Sweep the discovery source on a fixed interval.
#[derive(Debug, Clone)]
pub struct PollingRefresh {
    interval: Duration,
}

impl PollingRefresh {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl RefreshStrategy for PollingRefresh {
    fn name(&self) -> &'static str {
        "poll"
    }

    async fn run(&self, registry: Arc<ServiceRegistry>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; startup already swept once.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match registry.poll_network().await {
                        Ok(0) => {}
                        Ok(added) => tracing::info!(added, "Registry refreshed"),
                        // Keep serving with the last known node set; retry next tick.
                        Err(e) => tracing::error!(error = %e, "Storage discovery failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}

/// Follow the discovery source's event stream, resubscribing after `retry_delay`
/// whenever it cannot be opened or ends.
#[derive(Debug, Clone)]
pub struct EventRefresh {
    retry_delay: Duration,
}

impl EventRefresh {
    pub fn new(retry_delay: Duration) -> Self {
        Self { retry_delay }
    }
}

#[async_trait]
impl RefreshStrategy for EventRefresh {
    fn name(&self) -> &'static str {
        "events"
    }

    async fn run(&self, registry: Arc<ServiceRegistry>, mut shutdown: watch::Receiver<bool>) {
        loop {
            match registry.source().subscribe(registry.filter()).await {
                Ok(mut events) => loop {
                    tokio::select! {
                        event = events.recv() => {
                            let Some(event) = event else {
                                tracing::warn!("Discovery event stream ended");
                                break;
                            };
                            if let Err(e) = registry.handle_event(&event).await {
                                tracing::warn!(
                                    action = %event.action,
                                    container_id = %event.actor_id,
                                    error = %e,
                                    "Failed to apply discovery event"
                                );
                            }
                        }
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                return;
                            }
                        }
                    }
                },
                Err(e) => tracing::error!(error = %e, "Cannot subscribe to discovery events"),
            }

            tokio::select! {
                _ = sleep(self.retry_delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}
