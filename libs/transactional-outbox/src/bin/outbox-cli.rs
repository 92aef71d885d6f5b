//! Operational CLI for replaying outbox events.
//!
//! Not part of the relay's normal operation — an escape hatch for
//! re-publishing a time or id range after, say, a broker outage that
//! outlasted the poison-event grace period.

use std::env;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use transactional_outbox::SqlxOutboxRepository;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage:");
        eprintln!("  outbox-cli replay-since <rfc3339_ts> <DATABASE_URL>");
        eprintln!("  outbox-cli replay-range <from_uuid> <to_uuid> <DATABASE_URL>");
        std::process::exit(1);
    }

    let cmd = args[1].as_str();

    match cmd {
        "replay-since" if args.len() == 4 => {
            let ts: DateTime<Utc> = DateTime::parse_from_rfc3339(&args[2])?.with_timezone(&Utc);
            let pool = PgPool::connect(&args[3]).await?;
            let repo = SqlxOutboxRepository::new(pool);
            let count = repo.replay_since(ts).await?;
            println!("Replayed {count} events since {ts}");
        }
        "replay-range" if args.len() == 5 => {
            let from = Uuid::parse_str(&args[2])?;
            let to = Uuid::parse_str(&args[3])?;
            let pool = PgPool::connect(&args[4]).await?;
            let repo = SqlxOutboxRepository::new(pool);
            let count = repo.replay_range(from, to).await?;
            println!("Replayed {count} events between {from} and {to}");
        }
        _ => {
            eprintln!("Invalid arguments");
            std::process::exit(1);
        }
    }

    Ok(())
}
