//! Agent configuration

use anyhow::{Context, Result};
use cascade_lib::PipelineConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming an optional configuration file
const CONFIG_FILE_ENV: &str = "CASCADE_CONFIG";

/// Prefix for environment overrides, e.g. `CASCADE__API_PORT=9000`
const ENV_PREFIX: &str = "CASCADE";

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Name attached to every structured log event
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// JSON lines file of samples; stdin when unset
    #[serde(default)]
    pub input_path: Option<PathBuf>,

    /// JSON lines file receiving persisted aggregates
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "cascade-agent".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_output_path() -> PathBuf {
    PathBuf::from("aggregates.jsonl")
}

impl AgentConfig {
    /// Load configuration from the optional config file and the environment
    pub fn load() -> Result<Self> {
        let file = std::env::var(CONFIG_FILE_ENV).ok().map(PathBuf::from);
        Self::load_from(file.as_deref())
    }

    /// Layer `file` (if any) under the environment overrides
    pub fn load_from(file: Option<&Path>) -> Result<Self> {
        Self::load_layered(file, environment())
    }

    fn load_layered(file: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path));
        }

        let config: AgentConfig = builder
            .add_source(env)
            .build()
            .context("Failed to read agent configuration")?
            .try_deserialize()
            .context("Invalid agent configuration")?;

        config
            .pipeline
            .validate()
            .context("Invalid pipeline configuration")?;

        Ok(config)
    }
}

/// `CASCADE__PIPELINE__ENGINE__WARMUP_SAMPLES=30` sets `pipeline.engine.warmup_samples`
fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_lib::{Granularity, Grouping};
    use tempfile::TempDir;

    #[test]
    fn test_load_from_toml_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("agent.toml");
        std::fs::write(
            &path,
            r#"
instance_name = "cascade-test"
api_port = 9191
input_path = "/var/lib/cascade/samples.jsonl"

[pipeline]
persist_granularities = ["day"]
channel_capacity = 64

[pipeline.engine]
warmup_samples = 12

[pipeline.parallelism]
raw = 4

[pipeline.grouping]
hour = "key"
"#,
        )
        .unwrap();

        let config = AgentConfig::load_from(Some(&path)).unwrap();

        assert_eq!(config.instance_name, "cascade-test");
        assert_eq!(config.api_port, 9191);
        assert_eq!(
            config.input_path,
            Some(PathBuf::from("/var/lib/cascade/samples.jsonl"))
        );
        assert_eq!(config.output_path, PathBuf::from("aggregates.jsonl"));
        assert_eq!(config.pipeline.engine.warmup_samples, 12);
        assert_eq!(config.pipeline.channel_capacity, 64);
        assert_eq!(config.pipeline.parallelism_for(Granularity::Raw), 4);
        assert_eq!(config.pipeline.grouping_for(Granularity::Hour), Grouping::Key);
        assert!(config
            .pipeline
            .persist_granularities
            .contains(&Granularity::Day));
    }

    #[test]
    fn test_environment_overrides_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("agent.toml");
        std::fs::write(
            &path,
            "api_port = 9191\n\n[pipeline.engine]\nwarmup_samples = 12\nsnooze_cooldown = 3\n",
        )
        .unwrap();

        let vars = [
            ("CASCADE__PIPELINE__ENGINE__WARMUP_SAMPLES", "7"),
            ("CASCADE__API_PORT", "9300"),
        ];
        let env = environment().source(Some(
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ));

        let config = AgentConfig::load_layered(Some(&path), env).unwrap();

        assert_eq!(config.api_port, 9300);
        assert_eq!(config.pipeline.engine.warmup_samples, 7);
        assert_eq!(config.pipeline.engine.snooze_cooldown, 3);
    }

    #[test]
    fn test_invalid_pipeline_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("agent.toml");
        std::fs::write(&path, "[pipeline]\nchannel_capacity = 0\n").unwrap();

        let err = AgentConfig::load_from(Some(&path)).unwrap_err();
        assert!(format!("{:#}", err).contains("channel_capacity"));
    }
}
