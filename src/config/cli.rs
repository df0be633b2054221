use clap::{Args as ClapArgs, Parser, Subcommand};
use parking_lot::RwLock;
use std::{
    fs,
    net::{IpAddr, Ipv4Addr},
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
    time::Duration,
};

use super::types::{LogLevel, Transport};

// -----------------------------------------------------------------------------
// ----- Global Singleton ------------------------------------------------------

static CLI_CONFIG: OnceLock<Arc<RwLock<CliConfig>>> = OnceLock::new();

// -----------------------------------------------------------------------------
// ----- CliConfig -------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct CliConfig {
    pub log_level: LogLevel,
    pub settings_file_location: Option<PathBuf>,
    pub command: Command,
}

impl CliConfig {
    pub fn init() {
        CLI_CONFIG.get_or_init(|| {
            let cfg = Self::from_args();
            cfg.validate();
            Arc::new(RwLock::new(cfg))
        });
    }

    pub fn snapshot() -> CliConfig {
        handle().read().clone()
    }
}

// -----------------------------------------------------------------------------
// ----- CliConfig: Private ----------------------------------------------------

impl CliConfig {
    fn from_args() -> Self {
        // parse() rather than try_parse(): --help and --version exit cleanly
        let args = Args::parse();

        Self {
            log_level: args.log_level,
            settings_file_location: args.settings_file,
            command: args.command,
        }
    }

    fn validate(&self) {
        if let Some(path) = &self.settings_file_location {
            must_exist_file(path, "--settings / peerlink.toml");
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Args ------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "peerlink", version, about = "TCP/UDP peer sessions")]
struct Args {
    // Not required via CLI or ENV (defaults to info).
    #[arg(long = "log", env = "PEERLINK_LOG", default_value = "info", global = true)]
    log_level: LogLevel,

    // Optional; [session] overrides on top of the built-in defaults.
    #[arg(long = "settings", env = "PEERLINK_SETTINGS_FILE", global = true)]
    settings_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Accept stream peers and send every message back to its sender.
    TcpEcho(ServeArgs),

    /// Bind a datagram channel and send every datagram back to its sender.
    UdpEcho(ServeArgs),

    /// Connect, send one request and print the first reply.
    TcpRequest(RequestArgs),

    /// Send one datagram request and print the first reply.
    UdpRequest(RequestArgs),

    /// Fire a single payload without keeping any session.
    SendOnce(SendOnceArgs),

    /// Print the primary local address, free ports and, optionally, what a
    /// host name resolves to.
    Probe(ProbeArgs),
}

#[derive(ClapArgs, Clone, Debug)]
pub struct ServeArgs {
    #[arg(long = "host", short = 'H', env = "PEERLINK_HOST", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    // 0 lets the system pick.
    #[arg(long = "port", short = 'p', env = "PEERLINK_PORT", default_value_t = 0)]
    pub port: u16,
}

#[derive(ClapArgs, Clone, Debug)]
pub struct RequestArgs {
    // Name or IP literal.
    #[arg(long = "host", short = 'H', env = "PEERLINK_HOST")]
    pub host: String,

    #[arg(long = "port", short = 'p', env = "PEERLINK_PORT")]
    pub port: u16,

    #[arg(long = "local-port", default_value_t = 0)]
    pub local_port: u16,

    // e.g. 500ms, 5s. Falls back to the session response timeout.
    #[arg(long = "timeout", value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    pub payload: String,
}

#[derive(ClapArgs, Clone, Debug)]
pub struct SendOnceArgs {
    #[arg(long = "transport", short = 't', value_enum, default_value = "tcp")]
    pub transport: Transport,

    #[arg(long = "host", short = 'H', env = "PEERLINK_HOST")]
    pub host: String,

    #[arg(long = "port", short = 'p', env = "PEERLINK_PORT")]
    pub port: u16,

    #[arg(long = "local-port", default_value_t = 0)]
    pub local_port: u16,

    pub payload: String,
}

#[derive(ClapArgs, Clone, Debug)]
pub struct ProbeArgs {
    pub host: Option<String>,
}

// -----------------------------------------------------------------------------
// ----- Private Utils ---------------------------------------------------------

fn handle() -> Arc<RwLock<CliConfig>> {
    CLI_CONFIG
        .get()
        .expect("cli config not initialized; call Config::init().await first")
        .clone()
}

fn must_exist_file(path: &Path, hint: &str) {
    let md = fs::metadata(path).unwrap_or_else(|_| {
        panic!("required file missing: {} (from {hint})", path.display());
    });

    if !md.is_file() {
        panic!("path is not a file: {} (from {hint})", path.display());
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
