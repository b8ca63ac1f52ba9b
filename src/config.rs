use std::{ffi::OsString, path::Path};

use clap::{ArgMatches, Command, CommandFactory, FromArgMatches, Parser};
use thiserror::Error;

use crate::size::ByteSize;

#[derive(Debug, Clone, Parser)]
#[command(about = "Records every incoming HTTP request to a size-capped log file")]
pub struct Config {
    /// Address the dump server listens on.
    #[arg(
        short = 'l',
        long = "listen",
        env = "LISTEN_ADDR",
        value_name = "ADDR",
        default_value = "localhost:4567",
        help = "The listen address"
    )]
    pub listen_addr: String,

    /// Empty means every dump is discarded.
    #[arg(
        short = 'o',
        long = "output",
        env = "REQUEST_LOG_FILE",
        value_name = "FILE",
        default_value = "",
        hide_default_value = true,
        help = "The request output file"
    )]
    pub output_file: String,

    #[arg(
        long = "max-output-size",
        env = "MAX_OUTPUT_SIZE",
        value_name = "SIZE",
        default_value = "0",
        help = "Max size of the output file, e.g. 10MB or 512KiB"
    )]
    pub max_output_size: ByteSize,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("please provide the listen address with -l")]
    EmptyListenAddr,
}

/// Environment fallbacks where a set-but-empty variable counts as unset.
const ENV_FALLBACKS: [(&str, &str); 3] = [
    ("listen_addr", "LISTEN_ADDR"),
    ("output_file", "REQUEST_LOG_FILE"),
    ("max_output_size", "MAX_OUTPUT_SIZE"),
];

impl Config {
    /// Parses process arguments, accepting the single-dash `-max-output-size`
    /// spelling alongside `--max-output-size`.
    pub fn load() -> Self {
        let matches = Self::command_with_env(|name| std::env::var_os(name))
            .get_matches_from(normalize_args(std::env::args_os()));
        Self::from_matches(&matches)
    }

    /// Drops the env fallback of every argument whose variable is present but
    /// empty, so the default applies instead.
    fn command_with_env(lookup: impl Fn(&str) -> Option<OsString>) -> Command {
        ENV_FALLBACKS
            .iter()
            .fold(Self::command(), |command, (id, variable)| {
                if lookup(variable).is_some_and(|value| value.is_empty()) {
                    command.mut_arg(*id, |arg| arg.env(None::<&'static str>))
                } else {
                    command
                }
            })
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self::from_arg_matches(matches).unwrap_or_else(|err| err.exit())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_addr.trim().is_empty() {
            return Err(ConfigError::EmptyListenAddr);
        }

        Ok(())
    }

    pub fn output_file(&self) -> Option<&Path> {
        if self.output_file.is_empty() {
            None
        } else {
            Some(Path::new(&self.output_file))
        }
    }
}

fn normalize_args(args: impl IntoIterator<Item = OsString>) -> Vec<OsString> {
    args.into_iter()
        .map(|arg| match arg.to_str() {
            Some(flag) if flag == "-max-output-size" || flag.starts_with("-max-output-size=") => {
                OsString::from(format!("-{flag}"))
            }
            _ => arg,
        })
        .collect()
}
