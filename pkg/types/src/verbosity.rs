//! klog-style verbosity levels mapped onto tracing level filters.

use tracing::level_filters::LevelFilter;

/// Environment variable that overrides the `--v` flag.
pub const VERBOSITY_ENV: &str = "VIRT_LAUNCHER_LOG_VERBOSITY";

/// Verbosity used when neither the flag nor the environment set one.
pub const DEFAULT_VERBOSITY: u8 = 2;

/// Result of combining the verbosity flag with the environment override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verbosity {
    pub level: u8,
    /// Environment value that could not be parsed. The caller logs it once
    /// the subscriber is up.
    pub rejected_env: Option<String>,
}

impl Verbosity {
    /// Resolve the effective verbosity. A valid environment value wins over
    /// the flag; an invalid one is reported and the flag value is kept.
    pub fn resolve(flag: u8, env: Option<&str>) -> Self {
        match env {
            None => Self {
                level: flag,
                rejected_env: None,
            },
            Some(raw) => match raw.trim().parse::<u8>() {
                Ok(level) => Self {
                    level,
                    rejected_env: None,
                },
                Err(_) => Self {
                    level: flag,
                    rejected_env: Some(raw.to_string()),
                },
            },
        }
    }

    /// Resolve against the process environment.
    pub fn from_env(flag: u8) -> Self {
        let env = std::env::var(VERBOSITY_ENV).ok();
        Self::resolve(flag, env.as_deref())
    }

    pub fn level_filter(&self) -> LevelFilter {
        match self.level {
            0 => LevelFilter::WARN,
            1..=2 => LevelFilter::INFO,
            3..=4 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }
}
