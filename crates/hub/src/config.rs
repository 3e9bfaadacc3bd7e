//! TOML config file loading, validation, and database seeding for the valve
//! relay and the initial set of timers.

use anyhow::{bail, Context, Result};
use irrigation_timers::{DayTime, Timer};
use serde::Deserialize;
use std::path::Path;

use crate::db::Db;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub valve: ValveEntry,
    #[serde(default)]
    pub timers: Vec<TimerEntry>,
}

#[derive(Debug, Deserialize)]
pub struct ValveEntry {
    #[serde(default = "default_gpio_pin")]
    pub gpio_pin: i64,
    /// Overrides `RELAY_ACTIVE_LOW` when set.
    #[serde(default)]
    pub active_low: Option<bool>,
}

impl Default for ValveEntry {
    fn default() -> Self {
        Self {
            gpio_pin: default_gpio_pin(),
            active_low: None,
        }
    }
}

fn default_gpio_pin() -> i64 {
    17
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimerEntry {
    pub name: String,
    /// `HH:MM` or `HH:MM:SS`.
    pub start_time: String,
    /// Seconds.
    pub duration: i64,
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
/// GPIO 28+ are not exposed on the standard header.
const VALID_GPIO_PINS: &[i64] = &[
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
];

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_valve(&mut errors);
        self.validate_timers(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_valve(&self, errors: &mut Vec<String>) {
        if !VALID_GPIO_PINS.contains(&self.valve.gpio_pin) {
            errors.push(format!(
                "valve: gpio_pin {} is not a usable BCM pin (2-27)",
                self.valve.gpio_pin
            ));
        }
    }

    fn validate_timers(&self, errors: &mut Vec<String>) {
        for (i, t) in self.timers.iter().enumerate() {
            let ctx = || {
                if t.name.trim().is_empty() {
                    format!("timers[{i}]")
                } else {
                    format!("timer '{}'", t.name)
                }
            };

            if t.name.trim().is_empty() {
                errors.push(format!("{}: name is empty", ctx()));
            }

            if let Err(e) = t.start_time.trim().parse::<DayTime>() {
                errors.push(format!("{}: start_time: {e}", ctx()));
            }

            if !(1..=86_400).contains(&t.duration) {
                errors.push(format!(
                    "{}: duration {} out of range [1, 86400]",
                    ctx(),
                    t.duration
                ));
            }
        }
    }

    /// Relay pin as the driver wants it. Only meaningful after `validate`.
    pub fn gpio_pin(&self) -> u8 {
        u8::try_from(self.valve.gpio_pin).unwrap_or_default()
    }
}

impl TimerEntry {
    fn to_timer(&self) -> Result<Timer> {
        let start: DayTime = self
            .start_time
            .trim()
            .parse()
            .with_context(|| format!("timer '{}': bad start_time", self.name))?;
        let duration = u32::try_from(self.duration)
            .with_context(|| format!("timer '{}': bad duration", self.name))?;
        Ok(Timer::new(self.name.trim(), start, duration))
    }
}

// ---------------------------------------------------------------------------
// Load + apply
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file. A missing file yields the
/// defaults.
pub fn load(path: &str) -> Result<Config> {
    if !Path::new(path).exists() {
        tracing::warn!(path, "config file not found, using defaults");
        return Ok(Config::default());
    }

    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

/// Seed the configured timers, but only into an empty table so edits made
/// through the API survive a restart.
pub async fn apply(config: &Config, db: &Db) -> Result<()> {
    let existing = db.count_timers().await?;
    if existing > 0 {
        tracing::info!(
            existing,
            configured = config.timers.len(),
            "timers already present, skipping seed"
        );
        return Ok(());
    }

    for entry in &config.timers {
        let timer = entry.to_timer()?;
        db.insert_timer(&timer)
            .await
            .with_context(|| format!("failed to seed timer '{}'", entry.name))?;
    }

    tracing::info!(timers = config.timers.len(), "config applied");

    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::memory_db;

    // -- Helper: build a valid baseline config that passes validation ------

    fn valid_timer() -> TimerEntry {
        TimerEntry {
            name: "Front lawn".into(),
            start_time: "06:00".into(),
            duration: 600,
        }
    }

    fn valid_config() -> Config {
        Config {
            valve: ValveEntry::default(),
            timers: vec![valid_timer()],
        }
    }

    /// Assert validation fails and the error message contains `needle`.
    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[valve]
gpio_pin = 22
active_low = false

[[timers]]
name = "Front lawn"
start_time = "06:00:00"
duration = 600

[[timers]]
name = "Beds"
start_time = "23:55"
duration = 900
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.valve.gpio_pin, 22);
        assert_eq!(config.valve.active_low, Some(false));
        assert_eq!(config.timers.len(), 2);
        assert_eq!(config.timers[1].start_time, "23:55");
        config.validate().unwrap();
    }

    #[test]
    fn parse_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.timers.is_empty());
        assert_eq!(config.valve.gpio_pin, 17);
        assert!(config.valve.active_low.is_none());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = load("/nonexistent/irrigation/config.toml").unwrap();
        assert!(config.timers.is_empty());
    }

    // -- Validation -------------------------------------------------------

    #[test]
    fn valid_config_passes() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn empty_name_rejected() {
        let mut cfg = valid_config();
        cfg.timers[0].name = "  ".into();
        assert_validation_err(&cfg, "timers[0]: name is empty");
    }

    #[test]
    fn bad_start_time_rejected() {
        let mut cfg = valid_config();
        cfg.timers[0].start_time = "25:00".into();
        assert_validation_err(&cfg, "timer 'Front lawn': start_time");
    }

    #[test]
    fn garbage_start_time_rejected() {
        let mut cfg = valid_config();
        cfg.timers[0].start_time = "six".into();
        assert_validation_err(&cfg, "start_time");
    }

    #[test]
    fn zero_duration_rejected() {
        let mut cfg = valid_config();
        cfg.timers[0].duration = 0;
        assert_validation_err(&cfg, "duration 0 out of range");
    }

    #[test]
    fn duration_over_a_day_rejected() {
        let mut cfg = valid_config();
        cfg.timers[0].duration = 86_401;
        assert_validation_err(&cfg, "duration 86401 out of range");
    }

    #[test]
    fn full_day_duration_accepted() {
        let mut cfg = valid_config();
        cfg.timers[0].duration = 86_400;
        cfg.validate().unwrap();
    }

    #[test]
    fn gpio_pin_0_rejected() {
        let mut cfg = valid_config();
        cfg.valve.gpio_pin = 0;
        assert_validation_err(&cfg, "gpio_pin 0");
    }

    #[test]
    fn gpio_pin_28_rejected() {
        let mut cfg = valid_config();
        cfg.valve.gpio_pin = 28;
        assert_validation_err(&cfg, "gpio_pin 28");
    }

    #[test]
    fn gpio_boundaries_accepted() {
        for pin in [2, 27] {
            let mut cfg = valid_config();
            cfg.valve.gpio_pin = pin;
            cfg.validate().unwrap();
            assert_eq!(i64::from(cfg.gpio_pin()), pin);
        }
    }

    #[test]
    fn errors_are_collected_not_short_circuited() {
        let mut cfg = valid_config();
        cfg.valve.gpio_pin = 1;
        cfg.timers.push(TimerEntry {
            name: "".into(),
            start_time: "xx".into(),
            duration: -5,
        });
        let msg = format!("{:#}", cfg.validate().unwrap_err());
        assert!(msg.contains("4 errors"), "got: {msg}");
    }

    // -- Seeding ----------------------------------------------------------

    #[tokio::test]
    async fn apply_seeds_empty_table() {
        let db = memory_db().await;
        apply(&valid_config(), &db).await.unwrap();

        let timers = db.list_timers().await.unwrap();
        assert_eq!(timers.len(), 1);
        assert_eq!(timers[0].name, "Front lawn");
        assert_eq!(timers[0].start_time.to_string(), "06:00:00");
    }

    #[tokio::test]
    async fn apply_leaves_existing_timers_alone() {
        let db = memory_db().await;
        apply(&valid_config(), &db).await.unwrap();
        apply(&valid_config(), &db).await.unwrap();
        assert_eq!(db.count_timers().await.unwrap(), 1);
    }
}
