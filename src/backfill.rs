use crate::config::{ApiConfig, LocationConfig};
use crate::error::Result;
use crate::fetcher::{HttpFetcher, UrlTemplate};
use crate::history::{top_of_hour, WeatherHistory, HOURS_PER_DAY};
use crate::limiter::{RateLimiter, RequestKind};
use crate::store::{PersistedState, StateStore};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Drives live and catch-up ingestion for one location.
///
/// Owns the location's history, rate limiter and persisted state;
/// callers must serialize `update` and `backfill_chunk` invocations
/// (the scheduler runs one cycle at a time per location). Locations
/// are fully independent of one another.
pub struct BackfillController {
    location: LocationConfig,
    history: WeatherHistory,
    limiter: RateLimiter,
    urls: UrlTemplate,
    fetcher: Arc<dyn HttpFetcher>,
    store: Arc<dyn StateStore>,
    limit_warned: bool,
}

impl BackfillController {
    pub fn new(
        location: LocationConfig,
        api: &ApiConfig,
        fetcher: Arc<dyn HttpFetcher>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        let history = WeatherHistory::new(location.lookback_days, location.units);
        let limiter = RateLimiter::new(api.max_calls_per_hour, api.max_calls_per_day);
        let urls = UrlTemplate::new(&api.base_url, &api.api_key);
        Self {
            location,
            history,
            limiter,
            urls,
            fetcher,
            store,
            limit_warned: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.location.name
    }

    pub fn history(&self) -> &WeatherHistory {
        &self.history
    }

    /// Restores persisted history and limiter state. An absent state
    /// record means a fresh location.
    pub async fn restore(&mut self) -> Result<()> {
        if let Some(state) = self.store.load(&self.location.name).await? {
            self.history.restore(state.observations);
            self.limiter
                .restore_events(state.hour_events, state.day_events);
            info!(
                location = self.location.name,
                observations = self.history.len(),
                "restored persisted state"
            );
        }
        Ok(())
    }

    async fn persist(&self) -> Result<()> {
        let state = PersistedState {
            observations: self.history.snapshot(),
            hour_events: self.limiter.hour_events(),
            day_events: self.limiter.day_events(),
        };
        self.store.save(&self.location.name, &state).await
    }

    /// Live cycle: always attempts exactly one fetch for the current
    /// top of hour, then persists regardless of the outcome. A
    /// duplicate of an already-held hour is rejected by the store.
    pub async fn update(&mut self, now: DateTime<Utc>) -> Result<()> {
        let hour = top_of_hour(now);
        if self.limiter.allows(RequestKind::Live, now) {
            self.limit_warned = false;
            self.fetch_hour(hour, now).await;
        } else {
            self.warn_limit_once();
        }
        self.persist().await
    }

    /// One bounded catch-up pass.
    ///
    /// Walks hour-aligned timestamps backward from `now` across the
    /// lookback horizon. Hours already held cost nothing; missing hours
    /// are fetched while both the per-call budget and the backfill rate
    /// budget hold. Unfilled hours remain gaps for the next invocation.
    /// Returns the number of fetches issued.
    pub async fn backfill_chunk(&mut self, now: DateTime<Utc>, max_calls: usize) -> Result<usize> {
        let newest = top_of_hour(now);
        let horizon = self.history.lookback_days() * HOURS_PER_DAY;
        let mut calls = 0;

        for offset in 0..horizon as i64 {
            let hour = newest - Duration::hours(offset);
            if self.history.contains_hour(hour) {
                continue;
            }
            if calls >= max_calls {
                break;
            }
            if !self.limiter.allows(RequestKind::Backfill, now) {
                self.warn_limit_once();
                break;
            }
            self.limit_warned = false;
            self.fetch_hour(hour, now).await;
            calls += 1;
        }

        if calls > 0 {
            debug!(
                location = self.location.name,
                calls,
                backlog = self.backlog(now),
                "backfill chunk complete"
            );
        }
        self.persist().await?;
        Ok(calls)
    }

    /// Number of hours in the lookback horizon not yet held.
    pub fn backlog(&self, now: DateTime<Utc>) -> usize {
        let newest = top_of_hour(now);
        let horizon = self.history.lookback_days() * HOURS_PER_DAY;
        (0..horizon as i64)
            .filter(|offset| !self.history.contains_hour(newest - Duration::hours(*offset)))
            .count()
    }

    /// Issues one permitted fetch. The limiter is charged up front: it
    /// tracks requests attempted, not successes.
    async fn fetch_hour(&mut self, hour: DateTime<Utc>, now: DateTime<Utc>) {
        self.limiter.record(now);
        let url = self.urls.timemachine(
            self.location.latitude,
            self.location.longitude,
            hour.timestamp(),
            self.location.units,
        );

        match self.fetcher.fetch(&url).await {
            Some(body) => {
                if !self.history.add_observation(&body) {
                    debug!(location = self.location.name, %hour, "observation rejected");
                }
            }
            None => {
                warn!(
                    location = self.location.name,
                    %hour,
                    "no data returned; gap remains for a later cycle"
                );
            }
        }
    }

    fn warn_limit_once(&mut self) {
        if !self.limit_warned {
            warn!(
                location = self.location.name,
                "request budget exhausted; skipping fetches until the rolling window reopens"
            );
            self.limit_warned = true;
        }
    }
}
