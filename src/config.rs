//! Service configuration.
//!
//! Everything is environment-driven with sane defaults; a `.env` file is
//! honored when present. Contradictory thresholds are a startup error, not
//! something to limp along with.

use std::env;
use std::path::PathBuf;

use anyhow::{bail, Result};

use crate::brain::BrainConfig;
use crate::observability::DEFAULT_SALE_PHRASES;

#[derive(Debug, Clone)]
pub struct Config {
    // Message bus
    pub nats_url: String,
    pub input_subject: String,
    pub output_subject: String,

    // Decision policy
    pub brain: BrainConfig,

    // State machine
    pub enable_state_machine: bool,
    pub auto_state_transition: bool,

    // Observability
    pub metrics_export_interval: f64,
    pub metrics_export_path: PathBuf,
    pub log_dir: PathBuf,
    pub sale_phrases: Vec<String>,

    // Viewer feed
    pub viewer_update_interval: f64,

    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nats_url: "nats://localhost:4222".to_string(),
            input_subject: "classified_comments".to_string(),
            output_subject: "speak_requests".to_string(),
            brain: BrainConfig::default(),
            enable_state_machine: true,
            auto_state_transition: true,
            metrics_export_interval: 300.0,
            metrics_export_path: PathBuf::from("./metrics"),
            log_dir: PathBuf::from("./logs"),
            sale_phrases: DEFAULT_SALE_PHRASES.iter().map(|s| s.to_string()).collect(),
            viewer_update_interval: 10.0,
            debug: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let defaults = Self::default();
        let mut brain = defaults.brain;
        brain.min_speak_interval = env_f64("MIN_SPEAK_INTERVAL", brain.min_speak_interval);
        brain.max_speak_interval = env_f64("MAX_SPEAK_INTERVAL", brain.max_speak_interval);
        brain.default_cooldown = env_f64("DEFAULT_COOLDOWN", brain.default_cooldown);
        brain.high_priority_threshold =
            env_parse("HIGH_PRIORITY_THRESHOLD", brain.high_priority_threshold);
        brain.auto_speak_priority = env_parse("AUTO_SPEAK_PRIORITY", brain.auto_speak_priority);
        brain.max_queue_size = env_parse("MAX_QUEUE_SIZE", brain.max_queue_size);
        brain.queue_timeout = env_f64("QUEUE_TIMEOUT", brain.queue_timeout);
        brain.duplicate_window = env_parse("DUPLICATE_WINDOW", brain.duplicate_window);
        brain.duplicate_similarity = env_f64("DUPLICATE_SIMILARITY", brain.duplicate_similarity);

        let sale_phrases = env::var("SALE_PHRASES")
            .map(|raw| {
                raw.split(',')
                    .map(|phrase| phrase.trim().to_string())
                    .filter(|phrase| !phrase.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.sale_phrases);

        let config = Self {
            nats_url: env::var("NATS_URL").unwrap_or(defaults.nats_url),
            input_subject: env::var("INPUT_SUBJECT").unwrap_or(defaults.input_subject),
            output_subject: env::var("OUTPUT_SUBJECT").unwrap_or(defaults.output_subject),
            brain,
            enable_state_machine: env_bool("ENABLE_STATE_MACHINE", defaults.enable_state_machine),
            auto_state_transition: env_bool("AUTO_STATE_TRANSITION", defaults.auto_state_transition),
            metrics_export_interval: env_f64(
                "METRICS_EXPORT_INTERVAL",
                defaults.metrics_export_interval,
            ),
            metrics_export_path: env::var("METRICS_EXPORT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.metrics_export_path),
            log_dir: env::var("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.log_dir),
            sale_phrases,
            viewer_update_interval: env_f64(
                "VIEWER_UPDATE_INTERVAL",
                defaults.viewer_update_interval,
            ),
            debug: env_bool("DEBUG", defaults.debug),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the decision procedure cannot honor.
    pub fn validate(&self) -> Result<()> {
        let brain = &self.brain;

        if brain.min_speak_interval <= 0.0 {
            bail!(
                "MIN_SPEAK_INTERVAL must be positive, got {}",
                brain.min_speak_interval
            );
        }
        if brain.min_speak_interval >= brain.max_speak_interval {
            bail!(
                "MIN_SPEAK_INTERVAL ({}) must be below MAX_SPEAK_INTERVAL ({})",
                brain.min_speak_interval,
                brain.max_speak_interval
            );
        }
        if brain.auto_speak_priority > 10 {
            bail!(
                "AUTO_SPEAK_PRIORITY must be at most 10, got {}",
                brain.auto_speak_priority
            );
        }
        if brain.high_priority_threshold > brain.auto_speak_priority {
            bail!(
                "HIGH_PRIORITY_THRESHOLD ({}) must not exceed AUTO_SPEAK_PRIORITY ({})",
                brain.high_priority_threshold,
                brain.auto_speak_priority
            );
        }
        if !(0.0..=1.0).contains(&brain.duplicate_similarity) || brain.duplicate_similarity == 0.0 {
            bail!(
                "DUPLICATE_SIMILARITY must be in (0, 1], got {}",
                brain.duplicate_similarity
            );
        }
        if brain.duplicate_window == 0 {
            bail!("DUPLICATE_WINDOW must be at least 1");
        }
        if brain.max_queue_size == 0 {
            bail!("MAX_QUEUE_SIZE must be at least 1");
        }
        if self.metrics_export_interval <= 0.0 {
            bail!(
                "METRICS_EXPORT_INTERVAL must be positive, got {}",
                self.metrics_export_interval
            );
        }
        if self.viewer_update_interval <= 0.0 {
            bail!(
                "VIEWER_UPDATE_INTERVAL must be positive, got {}",
                self.viewer_update_interval
            );
        }

        Ok(())
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<f64>().ok())
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn inverted_speak_intervals_are_rejected() {
        let mut config = Config::default();
        config.brain.min_speak_interval = 20.0;
        config.brain.max_speak_interval = 15.0;

        let error = config.validate().unwrap_err().to_string();
        assert!(error.contains("MIN_SPEAK_INTERVAL"));
    }

    #[test]
    fn threshold_above_auto_speak_is_rejected() {
        let mut config = Config::default();
        config.brain.high_priority_threshold = 10;
        config.brain.auto_speak_priority = 9;

        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_similarity_is_rejected() {
        let mut config = Config::default();
        config.brain.duplicate_similarity = 1.5;
        assert!(config.validate().is_err());

        config.brain.duplicate_similarity = 0.0;
        assert!(config.validate().is_err());
    }
}
