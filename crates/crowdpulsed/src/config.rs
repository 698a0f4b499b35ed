use crowdpulse_core::ModelPaths;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Which D-Bus bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    Session,
    System,
}

impl std::str::FromStr for BusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session" => Ok(BusKind::Session),
            "system" => Ok(BusKind::System),
            other => Err(format!("unknown bus '{other}'")),
        }
    }
}

/// Daemon configuration.
///
/// Built from defaults, then an optional TOML file (`CROWDPULSE_CONFIG`),
/// then `CROWDPULSE_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite results database.
    pub db_path: PathBuf,
    pub bus: BusKind,
    /// Load all models before registering on the bus.
    pub preload_models: bool,
    /// Attach base64 face crops to analysis replies.
    pub include_crops: bool,
    /// Default row count for history queries.
    pub history_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("crowdpulse");

        Self {
            model_dir: crowdpulse_core::default_model_dir(),
            db_path: data_dir.join("analyses.db"),
            bus: BusKind::Session,
            preload_models: true,
            include_crops: false,
            history_limit: 20,
        }
    }
}

impl Config {
    /// Load configuration: defaults, TOML file, then environment.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match std::env::var("CROWDPULSE_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML config file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        let config: Config = toml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))?;
        tracing::info!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Overlay `CROWDPULSE_*` variables. Unparseable values are ignored
    /// with a warning.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("CROWDPULSE_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = var("CROWDPULSE_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        parse_into(&var, "CROWDPULSE_BUS", &mut self.bus);
        if let Some(v) = var("CROWDPULSE_PRELOAD_MODELS") {
            self.preload_models = v != "0";
        }
        if let Some(v) = var("CROWDPULSE_INCLUDE_CROPS") {
            self.include_crops = v != "0";
        }
        parse_into(&var, "CROWDPULSE_HISTORY_LIMIT", &mut self.history_limit);
    }

    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths::in_dir(&self.model_dir)
    }
}

fn parse_into<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    if let Some(raw) = var(key) {
        match raw.parse() {
            Ok(v) => *slot = v,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable config value"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bus, BusKind::Session);
        assert!(config.preload_models);
        assert!(!config.include_crops);
        assert!(config.db_path.ends_with("crowdpulse/analyses.db"));
    }

    #[test]
    fn test_file_overrides_subset() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "model_dir = \"/srv/models\"\nbus = \"system\"\npreload_models = false").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.model_dir, PathBuf::from("/srv/models"));
        assert_eq!(config.bus, BusKind::System);
        assert!(!config.preload_models);
        assert_eq!(config.history_limit, 20);
        assert_eq!(config.model_paths().detector, PathBuf::from("/srv/models/det_10g.onnx"));
    }

    #[test]
    fn test_file_rejects_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bus = \"carrier-pigeon\"").unwrap();
        assert!(Config::from_file(file.path()).is_err());
    }

    #[test]
    fn test_env_overlay() {
        let vars: HashMap<&str, &str> = [
            ("CROWDPULSE_DB_PATH", "/var/lib/crowdpulse/a.db"),
            ("CROWDPULSE_BUS", "system"),
            ("CROWDPULSE_INCLUDE_CROPS", "1"),
            ("CROWDPULSE_HISTORY_LIMIT", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.db_path, PathBuf::from("/var/lib/crowdpulse/a.db"));
        assert_eq!(config.bus, BusKind::System);
        assert!(config.include_crops);
        assert!(config.preload_models);
        assert_eq!(config.history_limit, 20);
    }
}
