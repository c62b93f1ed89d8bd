use anyhow::Result;
use clap::{arg, ArgMatches};

use maillist::account::{self, Account};
use maillist::{Config, Database};

pub fn cmd() -> clap::Command {
    clap::Command::new("account")
        .subcommand_required(true)
        .display_order(10)
        .about("Inspect and manipulate accounts")
        .subcommand(
            clap::Command::new("add")
                .arg_required_else_help(true)
                .about("Adds a new account, or updates the one with the same email")
                .arg(arg!(<first_name> "Account first name"))
                .arg(arg!(<last_name> "Account last name"))
                .arg(arg!(<email> "Account email, used as the sender address")),
        )
        .subcommand(clap::Command::new("list").about("Lists all accounts"))
}

pub async fn run(matches: &ArgMatches, config: &Config) -> Result<()> {
    let db = Database::open(&config.database.path)?;

    match matches.subcommand() {
        Some(("add", m)) => {
            let mut account = Account::new(
                m.get_one::<String>("first_name").cloned().unwrap_or_default(),
                m.get_one::<String>("last_name").cloned().unwrap_or_default(),
                m.get_one::<String>("email").cloned().unwrap_or_default(),
            );
            account::upsert(&db, &mut account)?;
            println!("{}", account.id);
        }
        Some(("list", _)) => {
            for account in db.get_collection::<Account>()? {
                println!(
                    "{} {} {} <{}> {}",
                    account.id, account.first_name, account.last_name, account.email, account.status
                );
            }
        }
        _ => unreachable!("subcommand is required"),
    }

    db.flush().await?;

    Ok(())
}
