use std::{fmt, str::FromStr};

use tracing::{debug, error};

use crate::error::ConfigError;

/// Byte written over a block right before it goes back to the system.
pub const POISON_BYTE: u8 = 0xCC;

/// Prefix shared by every environment variable the tracker reads.
pub const ENV_PREFIX: &str = "MEMAUDIT";

/// Environment variable selecting the [`FailureMode`].
pub const FAILURE_MODE_VAR: &str = "MEMAUDIT_FAILURE_MODE";

/// Environment variable overriding [`POISON_BYTE`].
pub const POISON_BYTE_VAR: &str = "MEMAUDIT_POISON_BYTE";

const FAILURE_MODE_KEY: &str = "failure_mode";
const POISON_BYTE_KEY: &str = "poison_byte";

/// What happens when a check fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
  /// Hand the error back to the caller.
  #[default]
  Report,
  /// Panic with the error message.
  Panic,
  /// Log the error and abort the process.
  Abort,
}

impl FailureMode {
  /// Applies the mode to `result`. Only returns when the result is `Ok` or
  /// the mode is [`FailureMode::Report`].
  pub fn enforce<T, E: fmt::Display>(
    self,
    result: Result<T, E>,
  ) -> Result<T, E> {
    if let Err(err) = &result {
      match self {
        FailureMode::Report => debug!(%err, "memory check failed"),
        FailureMode::Panic => {
          error!(%err, "memory check failed");
          panic!("memory check failed: {err}");
        }
        FailureMode::Abort => {
          error!(%err, "memory check failed, aborting");
          std::process::abort();
        }
      }
    }
    result
  }
}

impl FromStr for FailureMode {
  type Err = ConfigError;

  fn from_str(
    s: &str,
  ) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "report" => Ok(FailureMode::Report),
      "panic" => Ok(FailureMode::Panic),
      "abort" | "strict" => Ok(FailureMode::Abort),
      _ => Err(ConfigError::FailureMode(s.to_string())),
    }
  }
}

/// Settings shared by every allocation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
  pub failure_mode: FailureMode,
  pub poison_byte: u8,
  /// Run a full audit when a queue is created or destroyed.
  pub lifecycle_audits: bool,
}

impl Default for TrackerConfig {
  fn default() -> Self {
    Self {
      failure_mode: FailureMode::Report,
      poison_byte: POISON_BYTE,
      lifecycle_audits: true,
    }
  }
}

impl TrackerConfig {
  /// Fail-fast configuration: every violation aborts the process.
  pub fn strict() -> Self {
    Self::default().with_failure_mode(FailureMode::Abort)
  }

  pub fn with_failure_mode(
    mut self,
    failure_mode: FailureMode,
  ) -> Self {
    self.failure_mode = failure_mode;
    self
  }

  pub fn with_poison_byte(
    mut self,
    poison_byte: u8,
  ) -> Self {
    self.poison_byte = poison_byte;
    self
  }

  pub fn with_lifecycle_audits(
    mut self,
    enabled: bool,
  ) -> Self {
    self.lifecycle_audits = enabled;
    self
  }

  /// Reads `MEMAUDIT_*` environment variables ([`FAILURE_MODE_VAR`],
  /// [`POISON_BYTE_VAR`]), keeping the defaults for unset ones.
  pub fn from_env() -> Result<Self, ConfigError> {
    Self::from_environment(::config::Environment::with_prefix(ENV_PREFIX))
  }

  /// Same as [`TrackerConfig::from_env`], reading `vars` instead of the
  /// process environment.
  pub fn from_vars(
    vars: &[(&str, &str)],
  ) -> Result<Self, ConfigError> {
    let source: ::config::Map<String, String> = vars
      .iter()
      .map(|(key, value)| (key.to_string(), value.to_string()))
      .collect();
    let environment = ::config::Environment::with_prefix(ENV_PREFIX).source(Some(source));
    Self::from_environment(environment)
  }

  fn from_environment(
    environment: ::config::Environment,
  ) -> Result<Self, ConfigError> {
    let settings = ::config::Config::builder()
      .add_source(environment)
      .build()?;
    let mut config = Self::default();

    if let Some(mode) = setting(&settings, FAILURE_MODE_KEY)? {
      config.failure_mode = mode.parse()?;
    }

    if let Some(byte) = setting(&settings, POISON_BYTE_KEY)? {
      config.poison_byte = parse_byte(&byte)?;
    }

    Ok(config)
  }
}

/// A string setting, `None` when it is not set at all.
fn setting(
  settings: &::config::Config,
  key: &str,
) -> Result<Option<String>, ConfigError> {
  match settings.get_string(key) {
    Ok(value) => Ok(Some(value)),
    Err(::config::ConfigError::NotFound(_)) => Ok(None),
    Err(err) => Err(err.into()),
  }
}

fn parse_byte(
  raw: &str,
) -> Result<u8, ConfigError> {
  let trimmed = raw.trim();
  let parsed = match trimmed
    .strip_prefix("0x")
    .or_else(|| trimmed.strip_prefix("0X"))
  {
    Some(hex) => u8::from_str_radix(hex, 16),
    None => trimmed.parse(),
  };
  parsed.map_err(|_| ConfigError::PoisonByte(raw.to_string()))
}
