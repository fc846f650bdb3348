use clap::Parser;
use log::info;
use miette::{IntoDiagnostic, Result};
use std::time::Duration;
use tokio_graceful_shutdown::Toplevel;

use skytrace_server::{Cli, Session, VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    env_logger::Builder::new()
        .filter_level(args.verbose.log_level_filter())
        .init();

    info!("SkyTrace server {}", VERSION);

    Toplevel::new(move |s| async move {
        match Session::new(&s, args).await {
            Ok(_session) => {}
            Err(e) => {
                log::error!("Startup failed: {}", e);
                s.request_shutdown();
            }
        }
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_secs(5))
    .await
    .into_diagnostic()
}
