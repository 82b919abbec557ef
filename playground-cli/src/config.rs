use std::path::Path;

use config::ConfigError;
use config::FileFormat;
use serde::Deserialize;
use tracing::info;

use crate::args::ProgramArgs;
use crate::args::get_config_dir;

/// Settings read from an optional configuration file. Command line flags take
/// precedence over anything configured here.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Deserialize)]
pub(crate) struct Config {
    #[serde(default)]
    pub max_cycles: Option<u32>,

    /// Pretty-print JSON written by `run` and `prove`.
    #[serde(default)]
    pub pretty: bool,
}

impl Config {
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_dir(&get_config_dir())
    }

    fn from_dir(config_dir: &Path) -> Result<Self, ConfigError> {
        let mut config_builder = config::Config::builder();

        let config_files = [
            ("config.json", FileFormat::Json),
            ("config.yaml", FileFormat::Yaml),
            ("config.toml", FileFormat::Toml),
        ];
        for (file, format) in config_files {
            let config_path = config_dir.join(file);
            if config_path.exists() {
                info!("Adding configuration file: {}", config_path.display());
                let config_file = config::File::from(config_path)
                    .format(format)
                    .required(false);
                config_builder = config_builder.add_source(config_file);
            } else {
                info!("Configuration file not found: {}", config_path.display());
            }
        }

        config_builder.build()?.try_deserialize()
    }

    /// The cycle limit to apply: the command line's if given, else the
    /// configured one.
    pub fn max_cycles(&self, program_args: &ProgramArgs) -> Option<u32> {
        program_args.max_cycles.or(self.max_cycles)
    }
}
