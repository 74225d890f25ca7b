use crate::cli::actions::{replay::Args, Action};
use crate::cli::commands::{self, policy};
use anyhow::{Context, Result};
use std::path::PathBuf;

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    match matches.subcommand() {
        Some((commands::CMD_REPLAY, sub)) => {
            let scenario = sub
                .get_one::<String>(commands::ARG_SCENARIO)
                .map(PathBuf::from)
                .context("missing required argument: --scenario")?;
            let policy = policy::Options::parse(sub)?.into_policy()?;

            Ok(Action::Replay(Args {
                scenario,
                validate: sub.get_flag(commands::ARG_VALIDATE),
                policy,
            }))
        }
        _ => anyhow::bail!("missing subcommand"),
    }
}
