use anyhow::{Error, Result};
use chrono::{DateTime, Utc};
use clap::{arg, Arg, ArgAction, ArgMatches};
use uuid::Uuid;

use maillist::account::{self, Account};
use maillist::campaign::{self, Campaign, EventId};
use maillist::list::{self, List};
use maillist::subscriber::{self, Subscriber};
use maillist::{Config, Database};

pub fn cmd() -> clap::Command {
    clap::Command::new("mail")
        .subcommand_required(true)
        .display_order(20)
        .about("Mailing lists and campaigns")
        .subcommand(
            clap::Command::new("send")
                .arg_required_else_help(true)
                .about("Schedule a campaign for mailing lists and events")
                .arg(arg!(--account <EMAIL> "Email of the sending account").required(true))
                .arg(arg!(--subject <SUBJECT> "Campaign subject").required(true))
                .arg(
                    Arg::new("file")
                        .long("file")
                        .value_name("PATH")
                        .required(true)
                        .help("Body template, e.g. `Hi {{.FirstName}}`"),
                )
                .arg(
                    Arg::new("lists")
                        .long("lists")
                        .value_name("LIST_ID")
                        .num_args(1..)
                        .action(ArgAction::Append)
                        .help("Mailing lists to send to"),
                )
                .arg(
                    Arg::new("events")
                        .long("events")
                        .value_name("EVENT_ID")
                        .num_args(1..)
                        .action(ArgAction::Append)
                        .value_parser(clap::value_parser!(i64))
                        .help("Events whose attendees receive the campaign"),
                )
                .arg(
                    Arg::new("at")
                        .long("at")
                        .value_name("RFC3339")
                        .help("Time to send at, now if not given"),
                ),
        )
        .subcommand(
            clap::Command::new("list")
                .about("Show mailing lists of an account, or the members of one list")
                .arg(
                    Arg::new("id")
                        .help("Select list by id")
                        .required(false)
                        .num_args(0..=1),
                )
                .arg(arg!(--account [EMAIL] "Email of the owning account")),
        )
        .subcommand(
            clap::Command::new("new-list")
                .arg_required_else_help(true)
                .about("Create a mailing list")
                .arg(arg!(--account <EMAIL> "Email of the owning account").required(true))
                .arg(arg!(<name> "List name")),
        )
        .subcommand(
            clap::Command::new("subscribe")
                .arg_required_else_help(true)
                .about("Add a subscriber to a mailing list")
                .arg(arg!(<list> "List id"))
                .arg(arg!(<first_name> "Subscriber first name"))
                .arg(arg!(<last_name> "Subscriber last name"))
                .arg(arg!(<email> "Subscriber email")),
        )
        .subcommand(
            clap::Command::new("progress")
                .arg_required_else_help(true)
                .about("Show delivery progress of a campaign")
                .arg(arg!(<campaign> "Campaign id")),
        )
}

pub async fn run(matches: &ArgMatches, config: &Config) -> Result<()> {
    let db = Database::open(&config.database.path)?;

    match matches.subcommand() {
        Some(("send", m)) => {
            let account = account_by_email(&db, m.get_one::<String>("account"))?;
            let path = m
                .get_one::<String>("file")
                .ok_or_else(|| Error::msg("body file is required"))?;
            let body = tokio::fs::read_to_string(path).await?;
            let subject = m.get_one::<String>("subject").cloned().unwrap_or_default();
            let scheduled = match m.get_one::<String>("at") {
                Some(at) => DateTime::parse_from_rfc3339(at)?.with_timezone(&Utc),
                None => Utc::now(),
            };

            let lists = m
                .get_many::<String>("lists")
                .unwrap_or_default()
                .map(|id| id.parse::<Uuid>())
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let events: Vec<EventId> = m.get_many::<i64>("events").unwrap_or_default().copied().collect();
            if lists.is_empty() && events.is_empty() {
                return Err(Error::msg("at least one list or event is required"));
            }

            let mut campaign = Campaign::new(account.id, subject, body, scheduled);
            campaign::insert(&db, &mut campaign, &lists, &events)?;
            println!("scheduled campaign {} for {}", campaign.id, campaign.scheduled);
        }
        Some(("list", m)) => match m.get_one::<String>("id") {
            Some(id) => {
                let list = list::get(&db, id.parse()?)?;
                println!("Mailing list `{}` subscribers:", list.name);
                for sub in list::subscribers_of(&db, list.id)? {
                    println!(
                        "{} {} {} <{}> {}",
                        sub.id, sub.first_name, sub.last_name, sub.email, sub.status
                    );
                }
            }
            None => {
                let account = account_by_email(&db, m.get_one::<String>("account"))?;
                let lists = list::lists_of(&db, account.id)?;
                let names: Vec<_> = lists.iter().map(|l| format!("{} ({})", l.name, l.id)).collect();
                println!("Found mailing lists: {}", names.join(", "));
            }
        },
        Some(("new-list", m)) => {
            let account = account_by_email(&db, m.get_one::<String>("account"))?;
            let list = List::new(account.id, m.get_one::<String>("name").cloned().unwrap_or_default());
            list::insert(&db, &list)?;
            println!("{}", list.id);
        }
        Some(("subscribe", m)) => {
            let list = list::get(
                &db,
                m.get_one::<String>("list")
                    .ok_or_else(|| Error::msg("list id is required"))?
                    .parse()?,
            )?;
            let mut sub = Subscriber::new(
                list.account,
                m.get_one::<String>("first_name").cloned().unwrap_or_default(),
                m.get_one::<String>("last_name").cloned().unwrap_or_default(),
                m.get_one::<String>("email").cloned().unwrap_or_default(),
            );
            subscriber::get_or_insert(&db, &mut sub)?;
            list::add_subscriber(&db, list.id, sub.id)?;
            println!("{}", sub.id);
        }
        Some(("progress", m)) => {
            let id = m
                .get_one::<String>("campaign")
                .ok_or_else(|| Error::msg("campaign id is required"))?
                .parse()?;
            let campaign = campaign::get(&db, id)?;
            let progress = campaign::progress(&db, id)?;
            println!(
                "{}: {}, {} pending, {} sent, {} failed",
                campaign.subject, campaign.status, progress.pending, progress.sent, progress.failed
            );
            if let Some(error) = &campaign.error {
                println!("gave up: {}", error);
            }
        }
        _ => unreachable!("subcommand is required"),
    }

    db.flush().await?;

    Ok(())
}

fn account_by_email(db: &Database, email: Option<&String>) -> Result<Account> {
    let email = email.ok_or_else(|| Error::msg("--account is required"))?;
    account::find_by_email(db, email)?.ok_or_else(|| Error::msg(format!("no account with email {}", email)))
}
