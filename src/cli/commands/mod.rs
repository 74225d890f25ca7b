pub mod logging;
pub mod policy;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ArgAction, ColorChoice, Command,
};

pub const CMD_REPLAY: &str = "replay";
pub const ARG_SCENARIO: &str = "scenario";
pub const ARG_VALIDATE: &str = "validate";

fn replay() -> Command {
    let command = Command::new(CMD_REPLAY)
        .about("Replay a recorded request scenario against an in-memory registry")
        .arg(
            Arg::new(ARG_SCENARIO)
                .short('s')
                .long(ARG_SCENARIO)
                .help("Path to the JSON scenario file")
                .env("SSOFLOW_SCENARIO")
                .required(true),
        )
        .arg(
            Arg::new(ARG_VALIDATE)
                .long(ARG_VALIDATE)
                .help("Validate every issued service ticket right after issuance")
                .env("SSOFLOW_VALIDATE")
                .action(ArgAction::SetTrue),
        );

    policy::with_args(command)
}

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("ssoflow")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(replay());

    logging::with_args(command)
}
