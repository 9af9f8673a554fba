use std::time::Duration;

use clap::Parser;

use crate::{framer::DEFAULT_CAPACITY, protocol::Channel};

/// Relay lines from stdin as private messages to everyone in an IRC channel.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Nickname to register with the server.
    pub nick: String,

    /// Channel whose members receive each line, without the leading '#'.
    pub channel: String,

    /// IRC server host name or address.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// IRC server port.
    #[arg(long, default_value_t = 6667)]
    pub port: u16,

    /// Idle time between polls of the server and stdin.
    #[arg(long, default_value_t = 1000)]
    pub poll_interval_ms: u64,

    /// How long to wait for a complete NAMES reply before dropping a line.
    #[arg(long, default_value_t = 30)]
    pub names_timeout_secs: u64,

    /// Do not message our own nickname when it appears in the channel.
    #[arg(long)]
    pub skip_self: bool,
}

/// Settings consumed by the dispatcher.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub nick: String,
    pub channel: Channel,
    pub poll_interval: Duration,
    pub names_timeout: Duration,
    pub skip_self: bool,
    pub line_capacity: usize,
}

impl From<&Cli> for RelayConfig {
    fn from(cli: &Cli) -> Self {
        Self {
            nick: cli.nick.clone(),
            channel: Channel::new(&cli.channel),
            poll_interval: Duration::from_millis(cli.poll_interval_ms),
            names_timeout: Duration::from_secs(cli.names_timeout_secs),
            skip_self: cli.skip_self,
            line_capacity: DEFAULT_CAPACITY,
        }
    }
}
