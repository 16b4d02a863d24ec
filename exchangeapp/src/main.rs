mod cli;

use std::fs::File;
use std::process;
use std::time::Duration;

use clap::Parser;
use exchange::{ExchangeConfig, FileTapeSource};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins over `--log-level` when both are set.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Trip `cancel` on the first SIGINT or, on unix, SIGTERM. The driver,
/// tape source, and gRPC listener all shut down off that one token.
fn install_shutdown_handlers(cancel: CancellationToken) {
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
        }
        on_interrupt.cancel();
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
                info!("SIGTERM received, shutting down");
                cancel.cancel();
            }
            Err(e) => error!(error = %e, "cannot listen for SIGTERM"),
        }
    });
}

#[tokio::main]
async fn main() {
    let args = cli::Args::parse();
    init_logging(&args.log_level);

    if !args.delimiter.is_ascii() {
        error!(delimiter = %args.delimiter, "delimiter must be a single ASCII character");
        process::exit(1);
    }

    let tape = match File::open(&args.tape) {
        Ok(file) => file,
        Err(e) => {
            error!(tape = %args.tape.display(), error = %e, "cannot open tape file");
            process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    install_shutdown_handlers(cancel.clone());

    let config = ExchangeConfig {
        listen_addr: args.listen,
        stats_interval: Duration::from_secs(args.stats_interval_secs.max(1)),
        tickers: args.tickers,
    };
    info!(tape = %args.tape.display(), listen = %config.listen_addr, "starting exchange");

    let source = FileTapeSource::new(args.delimiter as u8);
    if let Err(e) = exchange::serve(config, source, Box::new(tape), cancel).await {
        error!(error = %e, "exchange failed");
        process::exit(1);
    }
}
