use crate::store::{KeyValueStore, StoreError, SETTINGS_KEY};
use kairos_ipc::{SettingsError, TimerSettings};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum UpdateSettingsError {
    #[error(transparent)]
    Invalid(#[from] SettingsError),

    #[error("Failed to persist settings: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to encode settings: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Sole writer of the `timerSettings` key.
pub struct SettingsStore {
    store: Box<dyn KeyValueStore>,
    current: TimerSettings,
}

impl SettingsStore {
    pub fn load(store: Box<dyn KeyValueStore>) -> Self {
        let current = match store.get(SETTINGS_KEY) {
            Ok(Some(json)) => serde_json::from_str::<TimerSettings>(&json)
                .map(TimerSettings::sanitized)
                .unwrap_or_else(|e| {
                    warn!("Ignoring unreadable timer settings: {}", e);
                    TimerSettings::default()
                }),
            Ok(None) => TimerSettings::default(),
            Err(e) => {
                warn!("Failed to read timer settings, using defaults: {}", e);
                TimerSettings::default()
            }
        };
        Self { store, current }
    }

    pub fn current(&self) -> TimerSettings {
        self.current
    }

    pub fn update(&mut self, settings: TimerSettings) -> Result<TimerSettings, UpdateSettingsError> {
        settings.validate()?;
        let json = serde_json::to_string_pretty(&settings)?;
        self.store.set(SETTINGS_KEY, &json)?;
        self.current = settings;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    #[test]
    fn load_defaults_when_absent_or_garbage() {
        let settings = SettingsStore::load(Box::new(MemoryStore::new()));
        assert_eq!(settings.current(), TimerSettings::default());

        let settings = SettingsStore::load(Box::new(MemoryStore::with(SETTINGS_KEY, "{nope")));
        assert_eq!(settings.current(), TimerSettings::default());
    }

    #[test]
    fn load_sanitizes_zero_values() {
        let store = MemoryStore::with(SETTINGS_KEY, r#"{"workMinutes":0,"delaySeconds":10}"#);
        let settings = SettingsStore::load(Box::new(store)).current();
        assert_eq!(settings.work_minutes, 25);
        assert_eq!(settings.delay_seconds, 10);
    }

    #[test]
    fn update_persists_valid_settings() {
        let backing = Arc::new(MemoryStore::new());
        let mut settings = SettingsStore::load(Box::new(backing.clone()));
        let next = TimerSettings {
            work_minutes: 50,
            use_voice_interaction: true,
            ..TimerSettings::default()
        };
        settings.update(next).unwrap();

        let reloaded = SettingsStore::load(Box::new(backing));
        assert_eq!(reloaded.current(), next);
    }

    #[test]
    fn update_rejects_invalid_settings() {
        let mut settings = SettingsStore::load(Box::new(MemoryStore::new()));
        let err = settings
            .update(TimerSettings {
                short_break_minutes: 0,
                ..TimerSettings::default()
            })
            .unwrap_err();
        assert!(matches!(err, UpdateSettingsError::Invalid(_)));
        assert_eq!(settings.current(), TimerSettings::default());
    }
}
