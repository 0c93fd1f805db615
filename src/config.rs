use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub model: ModelConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_body_limit_mb")]
    pub body_limit_mb: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_body_limit_mb() -> usize {
    5
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn get_body_limit_bytes(&self) -> usize {
        self.body_limit_mb * 1024 * 1024
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub model_dir: PathBuf,
    pub onnx_file: String,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
    #[serde(
        default = "default_concurrency",
        deserialize_with = "deserialize_concurrency"
    )]
    pub concurrency: ConcurrencyPolicy,
}

fn default_model_instances() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_concurrency() -> ConcurrencyPolicy {
    ConcurrencyPolicy::Serialize
}

fn deserialize_concurrency<'de, D>(deserializer: D) -> Result<ConcurrencyPolicy, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

impl ModelConfig {
    pub fn get_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.onnx_file)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.get_model_path().exists() {
            return Err(format!("Model file not found: {:?}", self.get_model_path()));
        }
        Ok(())
    }
}

/// Whether forward passes share one mutexed session or round-robin over a
/// pool. `Serialize` is the safe choice when the engine build is not known
/// to be reentrant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyPolicy {
    Serialize,
    Concurrent,
}

impl TryFrom<String> for ConcurrencyPolicy {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "serialize" => Ok(Self::Serialize),
            "concurrent" => Ok(Self::Concurrent),
            other => Err(format!(
                "{} is not a supported concurrency policy. Use either `serialize` or `concurrent`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir().expect("Failed to determine the current directory");
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .expect("Failed to parse APP_ENVIRONMENT");

    let settings = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(config::File::from(
            configuration_directory.join(format!("{}.yaml", environment.as_str())),
        ))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let settings = settings.try_deserialize::<Config>()?;
    if let Err(e) = settings.model.validate() {
        tracing::error!("Configuration validation failed: {}", e);
        return Err(config::ConfigError::Message(e));
    }

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_policy_parses_known_values() {
        let serialize: ConcurrencyPolicy = "Serialize".to_string().try_into().unwrap();
        let concurrent: ConcurrencyPolicy = "concurrent".to_string().try_into().unwrap();

        assert_eq!(serialize, ConcurrencyPolicy::Serialize);
        assert_eq!(concurrent, ConcurrencyPolicy::Concurrent);
    }

    #[test]
    fn concurrency_policy_rejects_unknown_values() {
        let result: Result<ConcurrencyPolicy, _> = "parallel".to_string().try_into();
        assert!(result.is_err());
    }

    #[test]
    fn model_path_joins_dir_and_file() {
        let config = ModelConfig {
            model_dir: PathBuf::from("/opt/models"),
            onnx_file: "mobilenetv2.onnx".to_string(),
            num_instances: 1,
            concurrency: ConcurrencyPolicy::Serialize,
        };

        assert_eq!(
            config.get_model_path(),
            PathBuf::from("/opt/models/mobilenetv2.onnx")
        );
    }
}
