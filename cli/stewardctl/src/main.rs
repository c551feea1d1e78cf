//! stewardctl - elasticluster node reconciler.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use stewardctl::commands::Cli;
use stewardctl::error;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env("STEWARD_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| "info".into());

    let (json_layer, text_layer) = if json {
        (
            Some(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)),
            None,
        )
    } else {
        (
            None,
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    init_tracing(cli.log_json());

    if let Err(e) = cli.run().await {
        error::print_error(&e);
        std::process::exit(1);
    }
}
