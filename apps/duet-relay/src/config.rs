use anyhow::{bail, Context, Result};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "duet-relay",
    author,
    version,
    about = "Pairs two participants per room and relays their WebRTC negotiation"
)]
pub struct Cli {
    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// Interface to bind.
    #[arg(long, env = "DUET_RELAY_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// Serve the client application from `static_dir` alongside the relay.
    #[arg(long, env = "DUET_RELAY_SERVE_STATIC", default_value_t = false)]
    pub serve_static: bool,

    /// Directory holding the built client application.
    #[arg(long, env = "DUET_RELAY_STATIC_DIR", default_value = "client/build")]
    pub static_dir: PathBuf,

    /// Drop connections silent for this long. Zero disables pruning.
    #[arg(long, env = "DUET_RELAY_IDLE_TIMEOUT_SECS", default_value_t = 600)]
    pub idle_timeout_secs: u64,

    /// How often the idle sweep runs.
    #[arg(long, env = "DUET_RELAY_HEARTBEAT_INTERVAL_SECS", default_value_t = 60)]
    pub heartbeat_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub serve_static: bool,
    pub static_dir: PathBuf,
    pub idle_timeout: Option<Duration>,
    pub heartbeat_interval: Duration,
}

impl Config {
    /// Parse the command line, falling back to the environment.
    pub fn load() -> Result<Self> {
        Self::try_from(Cli::parse())
    }
}

impl TryFrom<Cli> for Config {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let ip: IpAddr = cli
            .bind
            .parse()
            .with_context(|| format!("invalid bind address: {}", cli.bind))?;

        let idle_timeout = (cli.idle_timeout_secs > 0)
            .then(|| Duration::from_secs(cli.idle_timeout_secs));
        if idle_timeout.is_some() && cli.heartbeat_interval_secs == 0 {
            bail!("heartbeat interval must be positive while idle pruning is enabled");
        }

        Ok(Config {
            listen_addr: SocketAddr::new(ip, cli.port),
            // Older deployments turn static serving on with `PROD`.
            serve_static: cli.serve_static || env_truthy("PROD"),
            static_dir: cli.static_dir,
            idle_timeout,
            heartbeat_interval: Duration::from_secs(cli.heartbeat_interval_secs),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            serve_static: false,
            static_dir: PathBuf::from("client/build"),
            idle_timeout: Some(Duration::from_secs(600)),
            heartbeat_interval: Duration::from_secs(60),
        }
    }
}

pub(crate) fn env_truthy(key: &str) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(
            val.to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}
