use crate::backfill::BackfillController;
use crate::config::Config;
use crate::error::Result;
use crate::fetcher::HttpFetcher;
use crate::sensors::{self, WindowSensor};
use crate::store::StateStore;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};

/// Periodic driver: one controller per configured location, cycled
/// strictly in sequence so update and backfill for a location never
/// interleave.
pub struct Scheduler {
    config: Config,
    controllers: Vec<LocationRunner>,
    shutdown_rx: watch::Receiver<bool>,
}

struct LocationRunner {
    controller: BackfillController,
    sensors: Vec<WindowSensor>,
}

impl Scheduler {
    pub fn new(
        config: Config,
        fetcher: Arc<dyn HttpFetcher>,
        store: Arc<dyn StateStore>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<Self> {
        let mut controllers = Vec::with_capacity(config.locations.len());
        for location in &config.locations {
            let sensors = location
                .sensors
                .iter()
                .map(WindowSensor::from_config)
                .collect::<Result<Vec<_>>>()?;
            let controller = BackfillController::new(
                location.clone(),
                &config.api,
                fetcher.clone(),
                store.clone(),
            );
            controllers.push(LocationRunner {
                controller,
                sensors,
            });
        }

        Ok(Self {
            config,
            controllers,
            shutdown_rx,
        })
    }

    pub async fn run(&mut self) -> Result<()> {
        let initial_delay = Duration::from_secs(self.config.scheduler.initial_delay_seconds);
        let poll_interval = Duration::from_secs(self.config.scheduler.interval_minutes * 60);

        info!(
            "Scheduler starting with {}s initial delay, {}m interval, {} location(s)",
            self.config.scheduler.initial_delay_seconds,
            self.config.scheduler.interval_minutes,
            self.controllers.len()
        );

        // Initial delay
        tokio::select! {
            _ = tokio::time::sleep(initial_delay) => {},
            _ = self.shutdown_rx.changed() => {
                info!("Shutdown received during initial delay");
                return Ok(());
            }
        }

        // Restore persisted state before the first cycle.
        for runner in &mut self.controllers {
            if let Err(e) = runner.controller.restore().await {
                error!(
                    location = runner.controller.name(),
                    "Failed to restore state: {e}"
                );
            }
        }

        // Run immediately, then on interval
        self.run_cycle().await;

        let mut ticker = interval(poll_interval);
        ticker.tick().await; // First tick is immediate, skip it

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
                _ = self.shutdown_rx.changed() => {
                    info!("Shutdown signal received, stopping scheduler");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn run_cycle(&mut self) {
        let max_calls = self.config.scheduler.max_calls_per_cycle;

        for runner in &mut self.controllers {
            let now = Utc::now();
            let name = runner.controller.name().to_string();

            if let Err(e) = runner.controller.update(now).await {
                error!(location = name, "Live update failed: {e}");
            }

            match runner.controller.backfill_chunk(now, max_calls).await {
                Ok(calls) => {
                    info!(
                        location = name,
                        calls,
                        backlog = runner.controller.backlog(now),
                        held = runner.controller.history().len(),
                        "Cycle complete"
                    );
                }
                Err(e) => {
                    error!(location = name, "Backfill failed: {e}");
                }
            }

            let variables = sensors::evaluate_all(runner.controller.history(), now, &runner.sensors);
            debug!(location = name, ?variables, "Evaluated variables");
        }
    }
}
