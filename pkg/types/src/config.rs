use serde::{Deserialize, Serialize};

/// Output format for the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Controller configuration file (YAML).
///
/// Example `config.yaml`:
/// ```yaml
/// data-dir: /var/lib/quota-controller/data
/// namespace-resync-secs: 60
/// profile-resync-secs: 300
/// requeue-delay-secs: 5
/// workers: 4
/// log-format: json
/// seed-manifest: /etc/quota-controller/profiles.yaml
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfigFile {
    #[serde(default, alias = "data-dir")]
    pub data_dir: Option<String>,
    #[serde(default, alias = "namespace-resync-secs")]
    pub namespace_resync_secs: Option<u64>,
    #[serde(default, alias = "profile-resync-secs")]
    pub profile_resync_secs: Option<u64>,
    #[serde(default, alias = "requeue-delay-secs")]
    pub requeue_delay_secs: Option<u64>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default, alias = "log-format")]
    pub log_format: Option<LogFormat>,
    #[serde(default, alias = "seed-manifest")]
    pub seed_manifest: Option<String>,
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}
