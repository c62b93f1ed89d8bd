use anyhow::{Error, Result};
use clap::{arg, ArgMatches};
use uuid::Uuid;

use maillist::suppression::SuppressionCache;
use maillist::{email, subscriber, Config, Database};

pub fn spam_cmd() -> clap::Command {
    clap::Command::new("spam")
        .arg_required_else_help(true)
        .display_order(30)
        .about("Check whether an address reported spam")
        .arg(arg!(<email> "Address to check"))
}

pub fn token_cmd() -> clap::Command {
    clap::Command::new("token")
        .arg_required_else_help(true)
        .display_order(31)
        .about("Print the unsubscribe token and link of a subscriber")
        .arg(arg!(<subscriber> "Subscriber id"))
}

fn suppression(db: &Database, config: &Config) -> Result<SuppressionCache> {
    let provider = email::from_config(config)?;
    Ok(SuppressionCache::new(db.clone(), provider, config)?)
}

pub async fn spam(matches: &ArgMatches, config: &Config) -> Result<()> {
    let address = matches
        .get_one::<String>("email")
        .ok_or_else(|| Error::msg("email is required"))?;

    let db = Database::open(&config.database.path)?;
    let cache = suppression(&db, config)?;
    let entry = cache.lookup(address).await?;
    if entry.reported_spam {
        println!("{} reported spam (as of {})", entry.email, entry.as_of);
    } else {
        println!("{} has not reported spam (as of {})", entry.email, entry.as_of);
    }

    Ok(())
}

pub async fn token(matches: &ArgMatches, config: &Config) -> Result<()> {
    let id: Uuid = matches
        .get_one::<String>("subscriber")
        .ok_or_else(|| Error::msg("subscriber id is required"))?
        .parse()?;

    let db = Database::open(&config.database.path)?;
    let cache = suppression(&db, config)?;
    let sub = subscriber::get(&db, id)?;
    println!("{}", cache.token_for(&sub));
    println!("{}", cache.unsubscribe_url(&sub));

    db.flush().await?;

    Ok(())
}
