//! A command line front end for the stack VM playground. Programs can be run,
//! proven, verified, and stepped through interactively.

// Allows the `coverage(off)` attribute on test modules when measuring test
// coverage with a nightly toolchain.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use clap::Parser;
use color_eyre::eyre::Result;
use tracing::error;
use tracing_error::ErrorLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use args::CliArgs;
use args::Command;
use args::LOG_ENV;
use crate::config::Config;

pub(crate) mod args;
pub(crate) mod commands;
pub(crate) mod config;

fn main() -> Result<()> {
    initialize_logging();
    initialize_panic_handler()?;

    let args = CliArgs::parse();
    let config = Config::new()?;
    let execution_result = match &args.command {
        Command::Run(program_args) => commands::run(program_args, &config),
        Command::Prove {
            program_args,
            output,
        } => commands::prove(program_args, output.as_deref(), &config),
        Command::Verify {
            program_args,
            outputs,
        } => commands::verify(program_args, outputs),
        Command::Debug(program_args) => commands::debug(program_args, &config),
    };
    if let Err(ref err) = execution_result {
        error!("{err}");
    }
    execution_result
}

/// Log to stderr, filtered by `RUST_LOG` or, failing that, by the crate's own
/// log level variable.
fn initialize_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_from_env(LOG_ENV.as_str()))
        .unwrap_or_else(|_| EnvFilter::new(format!("{}=info", env!("CARGO_CRATE_NAME"))));
    let stderr_subscriber = tracing_subscriber::fmt::layer()
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(env_filter);
    tracing_subscriber::registry()
        .with(stderr_subscriber)
        .with(ErrorLayer::default())
        .init();
}

fn initialize_panic_handler() -> Result<()> {
    let (panic_hook, eyre_hook) = color_eyre::config::HookBuilder::default()
        .panic_section("This is a bug. Consider reporting it together with the program.")
        .capture_span_trace_by_default(false)
        .display_location_section(false)
        .display_env_section(false)
        .into_hooks();
    eyre_hook.install()?;
    std::panic::set_hook(Box::new(move |panic_info| {
        let msg = panic_hook.panic_report(panic_info).to_string();
        error!("Error: {msg}");
        eprintln!("{msg}");
        std::process::exit(1);
    }));
    Ok(())
}
