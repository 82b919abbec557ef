use std::path::PathBuf;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::value_parser;
use directories::ProjectDirs;
use lazy_static::lazy_static;

lazy_static! {
    pub(crate) static ref PROJECT_NAME: String = env!("CARGO_CRATE_NAME").to_uppercase();
    pub(crate) static ref CONFIG_FOLDER: Option<PathBuf> =
        std::env::var(format!("{}_CONFIG", PROJECT_NAME.clone()))
            .ok()
            .map(PathBuf::from);
    pub(crate) static ref LOG_ENV: String = format!("{}_LOGLEVEL", PROJECT_NAME.clone());
}

#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(author, version = version(), about)]
pub(crate) struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub(crate) enum Command {
    /// Run a program and print its outputs
    Run(ProgramArgs),

    /// Run a program and write its outputs together with a proof
    Prove {
        #[command(flatten)]
        program_args: ProgramArgs,

        /// Where to write the outputs; printed if absent
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Check a proof against a program, its inputs, and claimed outputs
    Verify {
        #[command(flatten)]
        program_args: ProgramArgs,

        /// JSON file containing the outputs, including the proof
        #[arg(long, value_name = "PATH")]
        outputs: PathBuf,
    },

    /// Step through a program interactively, reading commands from stdin
    Debug(ProgramArgs),
}

impl Command {
    pub fn program_args(&self) -> &ProgramArgs {
        match self {
            Command::Run(program_args)
            | Command::Prove { program_args, .. }
            | Command::Verify { program_args, .. }
            | Command::Debug(program_args) => program_args,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub(crate) struct ProgramArgs {
    /// File containing the program
    pub program: PathBuf,

    /// JSON file containing the initial stack and the advice inputs
    #[arg(short, long, value_name = "PATH")]
    pub inputs: Option<PathBuf>,

    /// Abort execution after this many cycles, overriding the config file
    #[arg(long, value_name = "u32", value_parser = value_parser!(u32).range(1..))]
    pub max_cycles: Option<u32>,
}

fn project_directory() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "Stack VM Playground", env!("CARGO_PKG_NAME"))
}

pub(crate) fn get_config_dir() -> PathBuf {
    CONFIG_FOLDER
        .clone()
        .or_else(|| project_directory().map(|dirs| dirs.config_local_dir().to_path_buf()))
        .unwrap_or_else(|| PathBuf::from(".").join(".config"))
}

pub(crate) fn version() -> String {
    let version = env!("CARGO_PKG_VERSION");
    let author = clap::crate_authors!();
    let config_dir_path = get_config_dir().display().to_string();

    format!(
        "{version}\n\n\
        Authors: {author}\n\n\
        Config directory: {config_dir_path}"
    )
}
