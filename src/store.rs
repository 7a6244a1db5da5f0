use crate::error::Result;
use crate::history::Observation;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// Durable snapshot of one location's state: the full hourly history
/// plus both rate-limiter event lists, so neither observations nor the
/// request budget reset across process restarts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedState {
    pub observations: Vec<Observation>,
    pub hour_events: Vec<DateTime<Utc>>,
    pub day_events: Vec<DateTime<Utc>>,
}

/// Persistence collaborator, keyed by location name.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<PersistedState>>;
    async fn save(&self, key: &str, state: &PersistedState) -> Result<()>;
}

/// File-backed store: one JSON document per location under a state
/// directory. Writes go through a temp file and rename so a crash
/// mid-save never leaves a truncated state file.
pub struct JsonStateStore {
    dir: PathBuf,
}

impl JsonStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn load(&self, key: &str) -> Result<Option<PersistedState>> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let state: PersistedState = serde_json::from_slice(&bytes)?;
                debug!(
                    key,
                    observations = state.observations.len(),
                    "loaded persisted state"
                );
                Ok(Some(state))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, key: &str, state: &PersistedState) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let tmp = self.dir.join(format!("{key}.json.tmp"));

        let bytes = serde_json::to_vec(state)?;
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(
            key,
            observations = state.observations.len(),
            "saved persisted state"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> PersistedState {
        let ts = DateTime::from_timestamp(1_682_265_600, 0).unwrap();
        PersistedState {
            observations: vec![Observation {
                timestamp: ts,
                rain: 0.32,
                snow: 0.0,
                temp: 83.25,
                humidity: 67.0,
            }],
            hour_events: vec![ts],
            day_events: vec![ts, ts],
        }
    }

    #[tokio::test]
    async fn test_load_missing_key_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path());
        assert!(store.load("nowhere").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path());
        let state = sample_state();

        store.save("home", &state).await.unwrap();
        let loaded = store.load("home").await.unwrap().unwrap();

        assert_eq!(loaded.observations.len(), 1);
        assert_eq!(loaded.observations[0].rain, state.observations[0].rain);
        assert_eq!(
            loaded.observations[0].timestamp,
            state.observations[0].timestamp
        );
        assert_eq!(loaded.hour_events, state.hour_events);
        assert_eq!(loaded.day_events, state.day_events);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path());

        store.save("home", &sample_state()).await.unwrap();
        assert!(store.load("cabin").await.unwrap().is_none());
    }
}
