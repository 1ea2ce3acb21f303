//! Process wide settings, read once from the environment at startup.
//!
//! - `SVEIE_VL`: vector length in bits, 128..=2048 in steps of 128 (default 1024)
//! - `SVEIE_STATS`: `1` prints emulation statistics at exit
//! - `SVEIE_LOG`: log filter for this library (default `warn`)

use std::sync::OnceLock;

pub const VL_ENV: &str = "SVEIE_VL";
pub const STATS_ENV: &str = "SVEIE_STATS";
pub const LOG_ENV: &str = "SVEIE_LOG";

pub const DEFAULT_VECTOR_BITS: u32 = 1024;
pub const MIN_VECTOR_BITS: u32 = 128;
pub const MAX_VECTOR_BITS: u32 = 2048;

static CONFIG: OnceLock<Config> = OnceLock::new();

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("SVEIE_VL={value:?} is not a number")]
    InvalidNumber { value: String },
    #[error("SVEIE_VL={bits} is outside 128..=2048")]
    OutOfRange { bits: u32 },
    #[error("SVEIE_VL={bits} is not a multiple of 128")]
    NotMultiple { bits: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub vector_bits: u32,
    pub report_stats: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            vector_bits: DEFAULT_VECTOR_BITS,
            report_stats: false,
        }
    }
}

impl Config {
    /// Builds a configuration from the raw variable values, `None` meaning unset.
    pub fn from_values(vl: Option<&str>, stats: Option<&str>) -> Result<Self, ConfigError> {
        let vector_bits = match vl {
            None => DEFAULT_VECTOR_BITS,
            Some(value) => {
                let bits: u32 = value.parse().map_err(|_| ConfigError::InvalidNumber {
                    value: value.to_string(),
                })?;
                if !(MIN_VECTOR_BITS..=MAX_VECTOR_BITS).contains(&bits) {
                    return Err(ConfigError::OutOfRange { bits });
                }
                if bits % MIN_VECTOR_BITS != 0 {
                    return Err(ConfigError::NotMultiple { bits });
                }
                bits
            }
        };

        Ok(Config {
            vector_bits,
            report_stats: stats == Some("1"),
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let vl = std::env::var(VL_ENV).ok();
        let stats = std::env::var(STATS_ENV).ok();
        Self::from_values(vl.as_deref(), stats.as_deref())
    }

    pub fn vector_bytes(&self) -> usize {
        self.vector_bits as usize / 8
    }

    /// Makes `self` the process wide configuration. Only the first call has an effect.
    pub fn install(self) -> &'static Config {
        CONFIG.get_or_init(|| self)
    }

    /// The installed configuration, or the defaults if none was installed.
    pub fn global() -> &'static Config {
        CONFIG.get_or_init(Config::default)
    }
}

#[test]
fn config_test() {
    assert_eq!(Config::from_values(None, None), Ok(Config::default()));

    for bits in [128, 1024, 2048, 384] {
        let config = Config::from_values(Some(&bits.to_string()), None).expect("valid length");
        assert_eq!(config.vector_bits, bits);
        assert_eq!(config.vector_bytes(), bits as usize / 8);
    }

    assert_eq!(
        Config::from_values(Some("100"), None),
        Err(ConfigError::OutOfRange { bits: 100 })
    );
    assert_eq!(
        Config::from_values(Some("129"), None),
        Err(ConfigError::NotMultiple { bits: 129 })
    );
    assert_eq!(
        Config::from_values(Some("2049"), None),
        Err(ConfigError::OutOfRange { bits: 2049 })
    );
    for junk in ["abc", "", " 128", "-128", "1024.0"] {
        assert!(matches!(
            Config::from_values(Some(junk), None),
            Err(ConfigError::InvalidNumber { .. })
        ));
    }

    assert!(Config::from_values(None, Some("1")).unwrap().report_stats);
    assert!(!Config::from_values(None, Some("yes")).unwrap().report_stats);
    assert!(!Config::from_values(None, Some("0")).unwrap().report_stats);
}
