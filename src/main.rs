use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

pub mod cancel;
pub mod config;
use config::{Cli, load_config, setup_logging};
pub mod diagnosis;
pub mod endpoint;
pub mod http_probe;
use http_probe::prelude::*;
pub mod route;
use route::RouteTracer;
pub mod run;
use run::Diagnostics;
pub mod sink;
use sink::{ConsoleSink, FileSink, TeeSink};

const EXIT_SINK_FAILED: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_CANCELLED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Failed to load .env: {e}");
        }
    }
    setup_logging();

    let cli = Cli::parse();
    let config = match load_config(cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let file = match FileSink::create(&config.output) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Cannot write results to {}: {e}", config.output.display());
            return ExitCode::from(EXIT_SINK_FAILED);
        }
    };
    let mut sink = TeeSink::new().with(file);
    if !config.quiet {
        sink = sink.with(ConsoleSink);
    }

    let diagnostics = Arc::new(Diagnostics::new(
        RouteTracer::new(config.traceroute.clone()),
        ConnectionProbe::new(config.probe_settings()),
    ));

    let cancel = diagnostics.begin_run();
    let mut run = {
        let diagnostics = Arc::clone(&diagnostics);
        let endpoint = config.endpoint.clone();
        tokio::spawn(async move { diagnostics.run_with(&endpoint, &mut sink, cancel).await })
    };

    let joined = tokio::select! {
        joined = &mut run => joined,
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => {
                    log::info!("received Ctrl-C, cancelling");
                    diagnostics.request_cancel();
                }
                Err(e) => log::error!("failed to listen for Ctrl-C: {e}"),
            }
            run.await
        }
    };

    let report = match joined {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => {
            eprintln!("Failed to write results to {}: {e}", config.output.display());
            return ExitCode::from(EXIT_SINK_FAILED);
        }
        Err(e) => {
            log::error!("diagnostic run aborted: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("Results written to {}", config.output.display());

    if report.is_cancelled() {
        ExitCode::from(EXIT_CANCELLED)
    } else {
        ExitCode::SUCCESS
    }
}
