mod account;
mod mail;
mod run;
mod subscriber;

use std::str::FromStr;

use clap::{Arg, ArgAction, Command};
use maillist::{config, Config};
use tokio_util::sync::CancellationToken;

pub const VERSION: &'static str = env!("CARGO_PKG_VERSION");
pub const AUTHORS: &'static str = env!("CARGO_PKG_AUTHORS");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cancel = CancellationToken::new();

    let matches = cmd().get_matches();

    // Without an explicit path the default config file is used if present,
    // falling back to the defaults otherwise.
    let mut config: Config = match matches.get_one::<String>("config") {
        Some(path) => config::load_from(path)?,
        None => config::load().unwrap_or_default(),
    };

    if let Some(level) = matches.get_one::<String>("verbosity") {
        config.tracing.level = maillist::tracing::Level::from_str(level)?;
    }
    if matches.get_flag("dry_run") {
        config.dry_run = true;
    }
    maillist::tracing::init(&config)?;

    match matches.subcommand() {
        Some(("run", m)) => run::run(m, config, cancel.clone()).await?,
        Some(("account", m)) => account::run(m, &config).await?,
        Some(("mail", m)) => mail::run(m, &config).await?,
        Some(("spam", m)) => subscriber::spam(m, &config).await?,
        Some(("token", m)) => subscriber::token(m, &config).await?,
        _ => unreachable!("subcommand is required"),
    }

    Ok(())
}

pub fn cmd() -> Command {
    Command::new("maillist")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .infer_subcommands(true)
        .version(VERSION)
        .author(AUTHORS)
        .about("Mailing lists with scheduled campaigns")
        .subcommand(run::cmd())
        .subcommand(account::cmd())
        .subcommand(mail::cmd())
        .subcommand(subscriber::spam_cmd())
        .subcommand(subscriber::token_cmd())
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("PATH")
                .global(true)
                .help("Path to the configuration file"),
        )
        .arg(
            Arg::new("dry_run")
                .long("dry-run")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Print messages instead of sending them"),
        )
        .arg(
            Arg::new("verbosity")
                .long("verbosity")
                .short('v')
                .display_order(100)
                .value_name("level")
                .value_parser(["trace", "debug", "info", "warn", "error", "none"])
                .global(true)
                .help("Set the verbosity of the log output"),
        )
}
