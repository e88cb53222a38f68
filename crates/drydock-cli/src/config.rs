//! Splits configuration flags from subcommand arguments.
//!
//! Configuration flags must precede the subcommand; everything from the
//! subcommand on is left for the CLI parser.

use std::ffi::OsString;

use drydock_config::Config;
use ortho_config::OrthoConfig;

use crate::AppError;

/// Flags forwarded to the configuration loader.
pub(crate) const CONFIG_CLI_FLAGS: &[&str] = &["--config-path", "--log-filter", "--log-format"];

pub(crate) trait ConfigLoader {
    /// Loads configuration from the program name plus config flags.
    fn load(&self, args: &[OsString]) -> Result<Config, AppError>;
}

pub(crate) struct OrthoConfigLoader;

impl ConfigLoader for OrthoConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError> {
        Config::load_from_iter(args.iter().cloned()).map_err(AppError::LoadConfiguration)
    }
}

/// Arguments split into the loader's share and the parser's share. Both keep
/// the program name first.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct ConfigArgumentSplit {
    pub(crate) config_arguments: Vec<OsString>,
    pub(crate) cli_arguments: Vec<OsString>,
}

pub(crate) fn split_config_arguments(args: &[OsString]) -> ConfigArgumentSplit {
    let mut iter = args.iter();
    let program = iter
        .next()
        .cloned()
        .unwrap_or_else(|| OsString::from("drydock"));
    let mut config_arguments = vec![program.clone()];
    let mut cli_arguments = vec![program];
    while let Some(argument) = iter.next() {
        let text = argument.to_string_lossy();
        let (flag, inline_value) = match text.split_once('=') {
            Some((flag, _)) => (flag, true),
            None => (text.as_ref(), false),
        };
        if !CONFIG_CLI_FLAGS.contains(&flag) {
            cli_arguments.push(argument.clone());
            cli_arguments.extend(iter.by_ref().cloned());
            break;
        }
        config_arguments.push(argument.clone());
        if !inline_value && let Some(value) = iter.next() {
            config_arguments.push(value.clone());
        }
    }
    ConfigArgumentSplit {
        config_arguments,
        cli_arguments,
    }
}
