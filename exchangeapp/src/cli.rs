use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Exchange gRPC service — replays a trade tape and matches broker orders.
#[derive(Parser, Debug)]
#[command(name = "exchangeapp", version)]
pub struct Args {
    /// Tape file to replay (delimited text with a header row)
    pub tape: PathBuf,

    /// gRPC listen address
    #[arg(long, default_value = "127.0.0.1:8082")]
    pub listen: SocketAddr,

    /// Statistics interval in seconds
    #[arg(long, default_value = "1")]
    pub stats_interval_secs: u64,

    /// Restrict the statistics stream to these tickers (repeatable; default all)
    #[arg(long = "ticker")]
    pub tickers: Vec<String>,

    /// Tape column delimiter
    #[arg(long, default_value = ",")]
    pub delimiter: char,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}
