use anyhow::{ensure, Context, Result};
use irview_core::{NormalizerConfig, StreamGeometry};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Viewer configuration: defaults, then an optional TOML file, then
/// `IRVIEW_*` environment variables. Command line flags are applied last by
/// the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path of the infrared sensor.
    pub device: String,
    /// Requested stream width.
    pub width: u32,
    /// Requested stream height.
    pub height: u32,
    /// How often running stats are logged.
    pub stats_interval_ms: u64,
    /// Intensity calibration.
    pub normalizer: NormalizerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: "/dev/video2".to_string(),
            width: 512,
            height: 424,
            stats_interval_ms: 1000,
            normalizer: NormalizerConfig::default(),
        }
    }
}

impl Config {
    /// Load the layered configuration. `path` falls back to `IRVIEW_CONFIG`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("IRVIEW_CONFIG").ok().map(PathBuf::from));

        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                Self::from_toml_str(&text)
                    .with_context(|| format!("failed to parse config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Override fields from `IRVIEW_*` variables; unparseable values are
    /// ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(device) = lookup("IRVIEW_DEVICE") {
            self.device = device;
        }
        self.width = env_parse(&lookup, "IRVIEW_WIDTH", self.width);
        self.height = env_parse(&lookup, "IRVIEW_HEIGHT", self.height);
        self.stats_interval_ms =
            env_parse(&lookup, "IRVIEW_STATS_INTERVAL_MS", self.stats_interval_ms);
        self.normalizer.scene_average = env_parse(
            &lookup,
            "IRVIEW_SCENE_AVERAGE",
            self.normalizer.scene_average,
        );
        self.normalizer.scene_std_devs = env_parse(
            &lookup,
            "IRVIEW_SCENE_STD_DEVS",
            self.normalizer.scene_std_devs,
        );
    }

    /// Check the fully layered configuration.
    pub fn validate(&self) -> Result<()> {
        self.geometry()?;
        self.normalizer.validate()?;
        ensure!(self.stats_interval_ms > 0, "stats_interval_ms must be positive");
        Ok(())
    }

    pub fn geometry(&self) -> Result<StreamGeometry> {
        Ok(StreamGeometry::new(self.width, self.height)?)
    }
}

fn env_parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
