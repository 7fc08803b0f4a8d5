//! Skeeter - PostgreSQL notification relay.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use skeeter_server::{
    Args, ExitStatus, HaltFlag, NngPublisher, PgSession, PollMultiplexer, SignalHandlers,
    Supervisor,
};

fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skeeter_server=info,skeeter=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(status) => status.into(),
        Err(e) => {
            tracing::error!(error = %e, "startup failed");
            ExitStatus::Failure.into()
        }
    }
}

fn run(args: &Args) -> Result<ExitStatus, skeeter_server::Error> {
    let config = args.load_config()?;
    if args.check {
        println!("configuration ok: {} channel(s)", config.channels.len());
        return Ok(ExitStatus::Success);
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.pub_socket_uri,
        channels = ?config.channels,
        "starting skeeter"
    );

    let halt = HaltFlag::new();
    let signals = SignalHandlers::install(&halt)?;

    let publisher = NngPublisher::bind(&config)?;
    let supervisor = Supervisor::new(
        config,
        PgSession::open,
        publisher,
        PollMultiplexer::new(),
        halt,
    )?;

    let status = supervisor.run();
    if signals.interrupted() {
        tracing::info!("interrupted");
    }
    signals.uninstall();
    Ok(status)
}
