//! `[cache]` table: backend selection and sizing.
//!
//! ```toml
//! [cache]
//! type = "tiered"
//!
//! [[cache.tiers]]
//! type = "bounded"
//! max_size = 16_777_216
//! average_size = 16_384
//!
//! [[cache.tiers]]
//! type = "map"
//! prune_frequency = 30
//! ```

use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use super::bounded::{BoundedOptions, DEFAULT_WRITE_BUFFER};
use super::error::CacheError;
use super::map::DEFAULT_PRUNE_FREQUENCY;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Map,
    Bounded,
    Tiered,
    None,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Map => "map",
            Self::Bounded => "bounded",
            Self::Tiered => "tiered",
            Self::None => "none",
        }
    }
}

impl FromStr for BackendKind {
    type Err = CacheError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "map" => Ok(Self::Map),
            "bounded" => Ok(Self::Bounded),
            "tiered" => Ok(Self::Tiered),
            "none" => Ok(Self::None),
            other => Err(CacheError::invalid_config(
                "type",
                format!("unknown backend `{other}`; expected map, bounded, tiered or none"),
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BackendConfig {
    #[serde(rename = "type")]
    pub kind: BackendKind,
    pub max_size: Option<u64>,
    pub average_size: Option<u64>,
    /// Seconds between background sweeps.
    pub prune_frequency: Option<u64>,
    pub write_buffer: Option<usize>,
    pub tiers: Vec<BackendConfig>,
}

impl BackendConfig {
    pub fn of_kind(kind: BackendKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn prune_frequency(&self) -> Duration {
        self.prune_frequency
            .map_or(DEFAULT_PRUNE_FREQUENCY, Duration::from_secs)
    }

    /// Options for a bounded backend; sizes are required.
    pub fn bounded_options(&self) -> Result<BoundedOptions, CacheError> {
        let max_size = self
            .max_size
            .ok_or_else(|| CacheError::invalid_config("max_size", "required for bounded caches"))?;
        let average_size = self.average_size.ok_or_else(|| {
            CacheError::invalid_config("average_size", "required for bounded caches")
        })?;
        Ok(BoundedOptions {
            max_size,
            average_size,
            write_buffer: self.write_buffer.unwrap_or(DEFAULT_WRITE_BUFFER),
            prune_frequency: self.prune_frequency(),
        })
    }

    /// Check this table and every nested tier; keys in errors are relative
    /// to the table, e.g. `tiers[1].max_size`.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.prune_frequency == Some(0) {
            return Err(CacheError::invalid_config(
                "prune_frequency",
                "must be greater than zero",
            ));
        }

        match self.kind {
            BackendKind::Map | BackendKind::None => Ok(()),
            BackendKind::Bounded => self.bounded_options()?.validate(),
            BackendKind::Tiered => {
                if self.tiers.is_empty() {
                    return Err(CacheError::invalid_config(
                        "tiers",
                        "tiered caches need at least one tier",
                    ));
                }
                for (index, tier) in self.tiers.iter().enumerate() {
                    let prefix = format!("tiers[{index}]");
                    if tier.kind == BackendKind::None {
                        return Err(CacheError::invalid_config(
                            format!("{prefix}.type"),
                            "a tier cannot be `none`",
                        ));
                    }
                    tier.validate().map_err(|error| error.within(&prefix))?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid_key(config: &BackendConfig) -> String {
        match config.validate() {
            Err(CacheError::InvalidConfig { key, .. }) => key,
            other => panic!("expected invalid config, got {other:?}"),
        }
    }

    #[test]
    fn defaults_to_map_with_ten_second_prune() {
        let config = BackendConfig::default();
        assert_eq!(config.kind, BackendKind::Map);
        assert_eq!(config.prune_frequency(), Duration::from_secs(10));
        config.validate().expect("valid");
    }

    #[test]
    fn kind_parses_case_insensitively() {
        assert_eq!("Bounded".parse::<BackendKind>().expect("kind"), BackendKind::Bounded);
        assert_eq!(" none ".parse::<BackendKind>().expect("kind"), BackendKind::None);
        assert!("redis".parse::<BackendKind>().is_err());
    }

    #[test]
    fn bounded_requires_sizes() {
        let mut config = BackendConfig::of_kind(BackendKind::Bounded);
        assert_eq!(invalid_key(&config), "max_size");

        config.max_size = Some(1024);
        assert_eq!(invalid_key(&config), "average_size");

        config.average_size = Some(128);
        let options = config.bounded_options().expect("options");
        assert_eq!(options.write_buffer, DEFAULT_WRITE_BUFFER);
        config.validate().expect("valid");
    }

    #[test]
    fn zero_prune_frequency_is_rejected() {
        let config = BackendConfig {
            prune_frequency: Some(0),
            ..BackendConfig::default()
        };
        assert_eq!(invalid_key(&config), "prune_frequency");
    }

    #[test]
    fn tier_errors_carry_their_index() {
        let empty = BackendConfig::of_kind(BackendKind::Tiered);
        assert_eq!(invalid_key(&empty), "tiers");

        let config = BackendConfig {
            kind: BackendKind::Tiered,
            tiers: vec![
                BackendConfig::of_kind(BackendKind::Map),
                BackendConfig {
                    kind: BackendKind::Bounded,
                    max_size: Some(0),
                    average_size: Some(1),
                    ..BackendConfig::default()
                },
            ],
            ..BackendConfig::default()
        };
        assert_eq!(invalid_key(&config), "tiers[1].max_size");

        let with_none = BackendConfig {
            kind: BackendKind::Tiered,
            tiers: vec![BackendConfig::of_kind(BackendKind::None)],
            ..BackendConfig::default()
        };
        assert_eq!(invalid_key(&with_none), "tiers[0].type");
    }
}
