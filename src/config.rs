//! Layered application configuration.
//!
//! Priority, lowest first: built-in defaults, YAML file (`--config`,
//! `CONFIG_FILE`, or `./config.yaml`), `CHAAT_*` environment variables
//! (`__` separates sections, e.g. `CHAAT_SERVER__PORT=8000`), CLI flags.

use crate::llm::{LlmProtocol, LlmSettings};
use clap::Parser;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Default Gemini endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Default Gemini model.
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash-latest";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Address to bind
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Model identifier
    #[arg(long, env = "LLM_MODEL")]
    pub model: Option<String>,

    /// Base URL of the model API
    #[arg(long, env = "LLM_BASE_URL")]
    pub base_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub session: SessionConfig,
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub protocol: LlmProtocol,
    /// Per-request upstream timeout; unset means wait indefinitely.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("protocol", &self.protocol)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        // 1. Defaults
        let mut builder = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .set_default("llm.base_url", DEFAULT_BASE_URL)?
            .set_default("llm.model", DEFAULT_MODEL)?
            .set_default("llm.protocol", "auto")?
            .set_default("session.idle_timeout_secs", 30 * 60)?
            .set_default("session.sweep_interval_secs", 60)?
            .set_default("log.json", false)?;

        // 2. Config file
        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path).required(true)),
            None => builder.add_source(File::new("config.yaml", FileFormat::Yaml).required(false)),
        };

        // 3. Environment variables (prefixed with CHAAT_)
        builder = builder.add_source(
            Environment::with_prefix("CHAAT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        // 4. CLI flags (and the plain env vars clap reads for them)
        if let Some(host) = cli.host {
            builder = builder.set_override("server.host", host)?;
        }
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", i64::from(port))?;
        }
        if let Some(model) = cli.model {
            builder = builder.set_override("llm.model", model)?;
        }
        if let Some(base_url) = cli.base_url {
            builder = builder.set_override("llm.base_url", base_url)?;
        }

        let mut cfg: Self = builder.build()?.try_deserialize()?;

        // Secret names used by hosted deployments, consulted only when no
        // key was configured explicitly.
        cfg.llm.api_key = cfg
            .llm
            .api_key
            .filter(|k| !k.trim().is_empty())
            .or_else(|| non_empty_env("GEMINI_API_KEY"))
            .or_else(|| non_empty_env("LLM_API_KEY"));

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.llm.base_url.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "llm.base_url cannot be empty".to_string(),
            ));
        }
        if self.llm.model.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "llm.model cannot be empty".to_string(),
            ));
        }
        if self.session.sweep_interval_secs == 0 {
            return Err(config::ConfigError::Message(
                "session.sweep_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl LlmConfig {
    /// Driver settings derived from this section.
    pub fn settings(&self) -> LlmSettings {
        LlmSettings {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            protocol: self.protocol,
            timeout: self.timeout_secs.map(Duration::from_secs),
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}
