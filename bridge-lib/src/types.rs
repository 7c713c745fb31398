use std::{fmt, path::Path, result::Result as StdResult, str::FromStr, sync::OnceLock};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An encoded value (VOM or JSON) carried through the bridge without being
/// interpreted.
pub type Payload = Vec<u8>;

pub const DEFAULT_STREAM_BUFFER: usize = 100;

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    pub runtime: RuntimeConfig,
    pub stream: StreamConfig,
    pub log: LogConfig,
    pub loopback: LoopbackConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub worker_threads: usize,
    pub thread_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            worker_threads: 2,
            thread_name: "v23-bridge".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
    /// Capacity of the queue between a forwarding task and its iterator.
    pub buffer_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            buffer_size: DEFAULT_STREAM_BUFFER,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    pub level: String,
    pub tag: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "debug".to_string(),
            tag: "v23-bridge".to_string(),
        }
    }
}

impl LogConfig {
    pub fn level_filter(&self) -> Result<log::LevelFilter> {
        log::LevelFilter::from_str(&self.level)
            .map_err(|_| Error::config(format!("unknown log level {:?}", self.level)))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LoopbackConfig {
    pub channel_size: usize,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        LoopbackConfig { channel_size: 16 }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.runtime.worker_threads == 0 {
            return Err(Error::config("runtime.worker_threads must be positive"));
        }
        if self.stream.buffer_size == 0 {
            return Err(Error::config("stream.buffer_size must be positive"));
        }
        if self.loopback.channel_size == 0 {
            return Err(Error::config("loopback.channel_size must be positive"));
        }
        self.log.level_filter()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let load = || -> anyhow::Result<BridgeConfig> {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config = content
                .parse::<BridgeConfig>()
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        };
        let config = load().map_err(|e| Error::config(format!("{:#}", e)))?;
        config.validate()?;
        Ok(config)
    }
}

impl FromStr for BridgeConfig {
    type Err = toml::de::Error;
    fn from_str(s: &str) -> StdResult<Self, Self::Err> {
        toml::from_str(s)
    }
}

impl fmt::Display for BridgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        toml::to_string_pretty(self)
            .map_err(|_| fmt::Error)
            .and_then(|s| write!(f, "{}", s))
    }
}

/// Process-wide state that is set exactly once and never torn down.
pub struct InitCell<T> {
    name: &'static str,
    cell: OnceLock<T>,
}

impl<T> InitCell<T> {
    pub const fn new(name: &'static str) -> Self {
        InitCell {
            name,
            cell: OnceLock::new(),
        }
    }

    pub fn init(&self, value: T) -> Result<()> {
        self.cell
            .set(value)
            .map_err(|_| Error::AlreadyInitialized(self.name))
    }

    pub fn get(&self) -> Result<&T> {
        self.cell.get().ok_or(Error::NotInitialized(self.name))
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}

/// Locks a std mutex, recovering the data if a panicking holder poisoned it.
#[macro_export]
macro_rules! mutex_lock {
    ($lock:expr) => {{
        $lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_config_uses_defaults() {
        let config: BridgeConfig = "".parse().unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.stream.buffer_size, 100);
        config.validate().unwrap();
    }

    #[test]
    fn partial_config_overrides() {
        let config: BridgeConfig = "[stream]\nbuffer_size = 8\n[log]\nlevel = \"warn\"\n"
            .parse()
            .unwrap();
        assert_eq!(config.stream.buffer_size, 8);
        assert_eq!(config.log.level_filter().unwrap(), log::LevelFilter::Warn);
        assert_eq!(config.runtime.worker_threads, 2);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!("[stream]\nbufer_size = 8\n".parse::<BridgeConfig>().is_err());
    }

    #[test]
    fn display_round_trips() {
        let mut config = BridgeConfig::default();
        config.runtime.thread_name = "worker".to_string();
        let parsed: BridgeConfig = config.to_string().parse().unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn load_validates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[stream]\nbuffer_size = 0").unwrap();
        let err = BridgeConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("buffer_size"));

        let missing = BridgeConfig::load(Path::new("/nonexistent/bridge.toml")).unwrap_err();
        assert!(matches!(missing, Error::Config(_)));
    }

    #[test]
    fn init_cell_is_set_once() {
        let cell: InitCell<u32> = InitCell::new("test cell");
        assert!(matches!(cell.get(), Err(Error::NotInitialized("test cell"))));
        cell.init(7).unwrap();
        assert_eq!(*cell.get().unwrap(), 7);
        assert!(matches!(
            cell.init(8),
            Err(Error::AlreadyInitialized("test cell"))
        ));
        assert_eq!(*cell.get().unwrap(), 7);
    }
}
