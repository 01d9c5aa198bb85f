use std::fs::read_to_string;

use clap::Parser;
use serde::Deserialize;

#[derive(Deserialize, Debug)]
pub struct Server {
    /// port to listen for control connections on
    ///
    /// relays and clients both connect to this same port; role is decided
    /// by whether the peer's address appears on `allowed_relay_hosts`.
    #[serde(default = "Server::port")]
    pub port: u16,

    /// hostnames allowed to register as relays
    ///
    /// resolved to IPv4 addresses once at startup. a connecting peer whose
    /// address is not in the resolved set is always treated as a client,
    /// never a relay, regardless of what it claims to be.
    #[serde(default = "Server::allowed_relay_hosts")]
    pub allowed_relay_hosts: Vec<String>,
}

impl Server {
    fn port() -> u16 {
        23458
    }

    fn allowed_relay_hosts() -> Vec<String> {
        vec![]
    }
}

impl Default for Server {
    fn default() -> Self {
        Self {
            port: Self::port(),
            allowed_relay_hosts: Self::allowed_relay_hosts(),
        }
    }
}

#[derive(Deserialize, Debug)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
        }
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct Log {
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub log: Log,
}

#[derive(Parser)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
)]
struct Cli {
    /// specify the configuration file path
    #[arg(long)]
    config: Option<String>,

    /// override the listen port set in the config file
    #[arg(long)]
    port: Option<u16>,
}

impl Config {
    /// Load command line parameters. If a configuration file path is given
    /// its contents are parsed, otherwise the default configuration is used;
    /// `--port` then overrides whatever the two produced.
    pub fn load() -> anyhow::Result<Self> {
        let cli = Cli::parse();

        let mut config: Config = match &cli.config {
            Some(path) => {
                let text = read_to_string(path)?;
                serde_json5::from_str(&text)?
            }
            None => Config::default(),
        };

        if let Some(port) = cli.port {
            config.server.port = port;
        }

        Ok(config)
    }
}
