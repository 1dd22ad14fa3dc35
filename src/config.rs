use std::error::Error;
use std::path::Path;
use std::time::Duration;

use serde::{Serialize, Deserialize};

use crate::audio::AudioOutput;
use crate::engine::EngineSettings;
use crate::playback::{LOOKAHEAD, SCHEDULE_INTERVAL};

pub const CONFIG_PATH: &str = "howlin.toml";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub default_midi_input: Option<String>,
    pub snapshot_file: String,
    pub lookahead_ms: u64,
    pub schedule_interval_ms: u64,
    pub audio_enabled: bool,
    /// Fixed RNG seed for reproducible humanize and probability rolls.
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_midi_input: None,
            snapshot_file: String::from("snapshots.msgpack"),
            lookahead_ms: (LOOKAHEAD * 1000.0).round() as u64,
            schedule_interval_ms: SCHEDULE_INTERVAL.as_millis() as u64,
            audio_enabled: true,
            seed: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn Error>> {
        Self::load_from(CONFIG_PATH)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<dyn Error>> {
        let s = std::fs::read_to_string(path)?;
        let c = toml::from_str(&s)?;
        Ok(c)
    }

    pub fn save(&self) -> Result<(), Box<dyn Error>> {
        self.save_to(CONFIG_PATH)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn Error>> {
        let s = toml::to_string(self)?;
        std::fs::write(path, s)?;
        Ok(())
    }

    pub fn schedule_interval(&self) -> Duration {
        Duration::from_millis(self.schedule_interval_ms.max(1))
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            output: if self.audio_enabled {
                AudioOutput::Device
            } else {
                AudioOutput::Disabled
            },
            lookahead: self.lookahead_ms as f64 / 1000.0,
            seed: self.seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_default() {
        let c: Config = toml::from_str("default_midi_input = \"Keystation\"").unwrap();
        assert_eq!(c.default_midi_input.as_deref(), Some("Keystation"));
        assert_eq!(c.lookahead_ms, 100);
        assert_eq!(c.schedule_interval_ms, 25);
        assert!(c.audio_enabled);
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_PATH);
        let c = Config { seed: Some(7), audio_enabled: false, ..Default::default() };
        c.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), c);
    }

    #[test]
    fn test_engine_settings() {
        let c = Config { audio_enabled: false, lookahead_ms: 50, ..Default::default() };
        let settings = c.engine_settings();
        assert_eq!(settings.output, AudioOutput::Disabled);
        assert_eq!(settings.lookahead, 0.05);
    }
}
