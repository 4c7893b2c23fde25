use common::{Environment, LogLevel};
use inference::{ExecutionProvider, ModelConfig};
use serde::Deserialize;

pub const ENV_PREFIX: &str = "TOONOUT";

#[derive(Deserialize)]
pub struct Config {
    pub log_level: LogLevel,
    pub environment: Environment,
    pub host: String,
    pub port: u16,
    /// Shared secret expected in `x-api-key`. Unset or empty disables the check.
    #[serde(default)]
    pub api_key: Option<String>,
    pub model_path: String,
    pub execution_provider: ExecutionProvider,
    pub input_width: u32,
    pub input_height: u32,
    pub input_name: String,
    pub output_name: String,
    pub apply_sigmoid: bool,
    pub intra_threads: usize,
    pub max_upload_bytes: usize,
    /// Decompressed size cap for a single archive member.
    pub max_entry_bytes: u64,
    pub preload_model: bool,
    #[serde(default)]
    pub otel_endpoint: Option<String>,
}

impl Config {
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|key| !key.is_empty())
    }

    pub fn model_config(&self) -> ModelConfig {
        ModelConfig {
            model_path: self.model_path.clone(),
            provider: self.execution_provider,
            input_size: (self.input_width, self.input_height),
            input_name: self.input_name.clone(),
            output_name: self.output_name.clone(),
            apply_sigmoid: self.apply_sigmoid,
            intra_threads: self.intra_threads,
        }
    }
}

pub fn get_configuration() -> Result<Config, ::config::ConfigError> {
    let defaults = ModelConfig::default();

    let config = ::config::Config::builder()
        .set_default("log_level", "info")?
        .set_default("environment", "development")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", 1337u64)?
        .set_default("model_path", defaults.model_path)?
        .set_default("execution_provider", defaults.provider.as_str())?
        .set_default("input_width", defaults.input_size.0 as u64)?
        .set_default("input_height", defaults.input_size.1 as u64)?
        .set_default("input_name", defaults.input_name)?
        .set_default("output_name", defaults.output_name)?
        .set_default("apply_sigmoid", defaults.apply_sigmoid)?
        .set_default("intra_threads", defaults.intra_threads as u64)?
        .set_default("max_upload_bytes", 512u64 * 1024 * 1024)?
        .set_default("max_entry_bytes", crate::archive::DEFAULT_MAX_ENTRY_BYTES)?
        .set_default("preload_model", false)?
        .add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;

    Ok(config)
}
