//! relaygl stress harness — entry point.
//!
//! ```text
//! relaygl-stress <iterations> <frames> [-client <machine:0.0>] [-ssl]
//! ```

use std::fs::File;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use relaygl_core::lifecycle::{self, DefaultHooks, fatal};
use relaygl_core::{FakerConfig, ProcessEnv, RelayError};
use relaygl_stress::args::HarnessArgs;
use relaygl_stress::run::{HarnessPlan, run};

fn init_tracing(config: &FakerConfig) {
    let level = if config.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log.as_deref().map(File::create) {
        Some(Ok(file)) => builder.with_ansi(false).with_writer(Mutex::new(file)).init(),
        Some(Err(e)) => {
            builder.init();
            tracing::warn!("could not open log file: {e}; logging to stdout");
        }
        None => builder.init(),
    }
}

#[tokio::main]
async fn main() {
    let args = match HarnessArgs::from_argv(std::env::args_os()) {
        Ok(args) => args,
        Err(usage) => {
            println!("{usage}");
            std::process::exit(1);
        }
    };

    // Initialisation logs before the configured subscriber exists.
    let early = tracing::subscriber::set_default(
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .finish(),
    );
    let lifecycle = lifecycle::global();
    let config = lifecycle.initialize_once(&ProcessEnv, &DefaultHooks);
    let _teardown = lifecycle.exit_guard();
    drop(early);
    init_tracing(&config);

    let plan = HarnessPlan::new(&args, &config);
    if let Err(e) = run(&plan).await {
        fatal(&RelayError::from(e));
        lifecycle.shutdown(1);
    }
}
