use crate::endpoint::parse_base;
use crate::transport::Backoff;
use crate::transport::websocket::{DEFAULT_CONNECT_TIMEOUT, WebSocketOptions};
use clap::{Parser, Subcommand};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Config file picked up from the working directory when none is given.
const DEFAULT_CONFIG_FILE: &str = "config.yaml";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE", global = true)]
    pub config: Option<String>,

    /// Backend base URL shared by the history endpoint and the WebSocket channel
    #[arg(long, env = "BACKEND_URL", global = true)]
    pub backend_url: Option<String>,

    /// History fetch timeout in milliseconds
    #[arg(long, env = "HISTORY_TIMEOUT_MS", global = true)]
    pub history_timeout_ms: Option<u64>,

    /// Port for the relay server
    #[arg(long, env = "PORT", global = true)]
    pub port: Option<u16>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Command {
    /// Join the room from the terminal (default)
    #[default]
    Chat,
    /// Run the in-memory relay server
    Serve,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub client: ClientConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    pub backend_url: String,
    pub history_timeout_ms: u64,
    pub outbox_capacity: usize,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
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
        Self::from_cli(&cli)
    }

    /// Build the layered configuration.
    ///
    /// Priority: CLI flag > CLI env var > `CHAT_` env > config file > defaults.
    pub fn from_cli(cli: &Cli) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder()
            .set_default("client.backend_url", "http://127.0.0.1:3000")?
            .set_default("client.history_timeout_ms", 5_000)?
            .set_default("client.outbox_capacity", 256)?
            .set_default("client.reconnect_base_ms", 500)?
            .set_default("client.reconnect_max_ms", 30_000)?
            .set_default("server.port", 3000)?
            .set_default("server.host", "127.0.0.1")?;

        match &cli.config {
            Some(path) => {
                builder = builder.add_source(File::with_name(path).required(true));
            }
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                builder = builder.add_source(
                    File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false),
                );
            }
            None => {}
        }

        // E.g. CHAT_CLIENT__BACKEND_URL=http://chat.internal:8080
        builder = builder.add_source(
            Environment::with_prefix("CHAT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(url) = &cli.backend_url {
            builder = builder.set_override("client.backend_url", url.as_str())?;
        }
        if let Some(ms) = cli.history_timeout_ms {
            builder = builder.set_override("client.history_timeout_ms", ms)?;
        }
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", u64::from(port))?;
        }

        let config: Self = builder.build()?.try_deserialize()?;
        config.client.base_url()?;
        Ok(config)
    }
}

impl ClientConfig {
    /// Parsed backend base URL.
    pub fn base_url(&self) -> Result<Url, config::ConfigError> {
        parse_base(&self.backend_url).map_err(|e| config::ConfigError::Message(e.to_string()))
    }

    pub fn history_timeout(&self) -> Duration {
        Duration::from_millis(self.history_timeout_ms)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            base: Duration::from_millis(self.reconnect_base_ms),
            max: Duration::from_millis(self.reconnect_max_ms),
            ..Backoff::default()
        }
    }

    pub fn websocket_options(&self) -> WebSocketOptions {
        WebSocketOptions {
            outbox_capacity: self.outbox_capacity,
            backoff: self.backoff(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// `host:port` for binding.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
