use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use color_eyre::Result;
use lnkeeper::{
    cli::{self, Cli},
    config::Config,
    interface::{InterfaceBuilder, Pacing},
    logging,
    scrollkeeper::Scrollkeeper,
    server,
};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use tracing::{debug, info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(command) = &cli.command {
        cli::handle_command(command.clone());

        return Ok(());
    }

    let stdout_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    logging::init(stdout_level, None).await;

    let mut config = if let Some(config_path) = &cli.config {
        debug!(?config_path, "Config from path");
        Config::new_from_path(config_path)
    } else {
        debug!("Default config");
        Config::default()
    };
    cli.apply(&mut config);
    config.validate()?;

    let mut builder = if config.replay {
        let pacing = if config.fast_replay {
            Pacing::FastAsPossible
        } else {
            Pacing::Realtime
        };
        InterfaceBuilder::replay(&config.capture_file, pacing)
    } else if config.dummy {
        InterfaceBuilder::dummy()
    } else {
        InterfaceBuilder::serial(&config.port, config.baud)
    };
    if config.capture {
        builder = builder.capture(&config.capture_file, config.timestamp);
    }
    let interface = Arc::new(builder.build().await?);

    if config.log {
        interface.register_callback(|message| {
            eprintln!("{} {message}", chrono::Local::now().format("%H:%M:%S"));
        });
    }

    let scrollkeeper = Scrollkeeper::new(interface.clone(), config.slot_trace);
    let mirror = scrollkeeper.clone().spawn();

    let interval = Duration::from_secs(config.report_interval);

    let reporter = {
        let scrollkeeper = scrollkeeper.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick would only print an empty report.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                println!("{scrollkeeper}");
            }
        })
    };

    let web = config
        .web_port
        .map(|port| tokio::spawn(server::run_on_port(scrollkeeper.clone(), interval, port)));

    #[cfg(unix)]
    {
        let mut hangup = signal(SignalKind::hangup())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C, quitting")
            }
            _ = hangup.recv() => {
                info!("Told to hang up, quitting")
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Ctrl-C, quitting");
    }

    interface.shutdown().await?;
    reporter.abort();
    mirror.abort();
    if let Some(web) = web {
        web.abort();
    }

    Ok(())
}
