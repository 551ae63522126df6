use anyhow::{Context, Result, bail};
use futures::future::try_join_all;
use serde::Deserialize;
use threadview::config::Config;
use threadview::db::Database;
use threadview::render::render_thread;
use threadview::{Message, RecordStore, StoreError};
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload};

const USAGE: &str = "Usage: threadview [--debug] <command>

Commands:
  thread <thread_id>... [--user <user_id>] [--json]   Show threaded view(s)
  count [<thread_id>]                                  Count emails (in a thread)
  source <email_id>                                    Print the raw source of an email
  add <file.json>                                      Store email record(s) from JSON
  read <email_id> <user_id>                            Mark an email read for a user
  unread <email_id> <user_id>                          Clear a read marker";

#[derive(Debug, PartialEq, Eq)]
struct ThreadArgs {
    thread_ids: Vec<i64>,
    user_id: Option<i64>,
    json: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EmailBatch {
    Many(Vec<Message>),
    One(Box<Message>),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // The level is only known once the config is read, but loading the config
    // can itself log, so the filter starts at INFO and is swapped afterwards.
    let debug_logging = std::env::args().any(|arg| arg == "--debug");
    let initial = if debug_logging {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let (filter, filter_handle) = reload::Layer::new(initial);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::load();
    if !debug_logging {
        filter_handle.modify(|filter| *filter = LevelFilter::from_level(config.log_level()))?;
    }

    let args: Vec<String> = std::env::args()
        .skip(1)
        .filter(|arg| arg != "--debug")
        .collect();
    let Some((command, rest)) = args.split_first() else {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    };

    let db = Database::new(&config.database_url)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_url))?;
    db.run_migrations().await.context("Failed to run migrations")?;

    match command.as_str() {
        "thread" => show_threads(&db, &config, &parse_thread_args(rest)?).await,
        "count" => count(&db, rest).await,
        "source" => {
            let id = rest.first().context("source requires an email id")?;
            println!("{}", db.email_source(id).await?);
            Ok(())
        }
        "add" => {
            let path = rest.first().context("add requires a JSON file")?;
            add_from_file(&db, path).await
        }
        "read" | "unread" => {
            let (email_id, user_id) = match rest {
                [email_id, user_id] => (email_id, parse_id(user_id)?),
                _ => bail!("{} requires <email_id> <user_id>", command),
            };
            if command == "read" {
                db.mark_as_read(email_id, user_id).await?;
            } else {
                db.mark_as_unread(email_id, user_id).await?;
            }
            info!(email_id = %email_id, user_id, command = %command, "updated read marker");
            Ok(())
        }
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(1);
        }
    }
}

async fn show_threads(db: &Database, config: &Config, args: &ThreadArgs) -> Result<()> {
    let views = try_join_all(
        args.thread_ids
            .iter()
            .map(|&thread_id| db.thread_view(thread_id, args.user_id)),
    )
    .await?;

    if args.json {
        let threads: Vec<serde_json::Value> = args
            .thread_ids
            .iter()
            .zip(&views)
            .map(|(thread_id, view)| {
                serde_json::json!({ "thread_id": thread_id, "emails": view })
            })
            .collect();
        let output = match threads.as_slice() {
            [single] => serde_json::to_string_pretty(single)?,
            _ => serde_json::to_string_pretty(&threads)?,
        };
        println!("{}", output);
        return Ok(());
    }

    for (thread_id, view) in args.thread_ids.iter().zip(&views) {
        println!("Thread {} ({} emails)", thread_id, view.len());
        println!("{}", "=".repeat(60));
        let text = render_thread(view, &config.render)
            .with_context(|| format!("Failed to render thread {}", thread_id))?;
        print!("{}", text);
    }
    Ok(())
}

async fn count(db: &Database, rest: &[String]) -> Result<()> {
    let total = match rest.first() {
        Some(thread_id) => db.thread_count(parse_id(thread_id)?).await?,
        None => db.email_count().await?,
    };
    println!("{}", total);
    Ok(())
}

async fn add_from_file(db: &Database, path: &str) -> Result<()> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
    let emails = match serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse emails in {}", path))?
    {
        EmailBatch::Many(emails) => emails,
        EmailBatch::One(email) => vec![*email],
    };

    let mut added = 0;
    for email in &emails {
        match db.add(email).await {
            Ok(()) => added += 1,
            Err(StoreError::Conflict { id }) => {
                warn!(email_id = %id, "email already stored, skipping");
            }
            Err(e) => return Err(e.into()),
        }
    }
    info!(added, skipped = emails.len() - added, "import finished");
    Ok(())
}

fn parse_id(value: &str) -> Result<i64> {
    value
        .parse()
        .with_context(|| format!("Invalid id: {}", value))
}

fn parse_thread_args(args: &[String]) -> Result<ThreadArgs> {
    let mut parsed = ThreadArgs {
        thread_ids: Vec::new(),
        user_id: None,
        json: false,
    };

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--json" => parsed.json = true,
            "--user" => {
                let value = iter.next().context("--user requires a user id")?;
                parsed.user_id = Some(parse_id(value)?);
            }
            other => parsed.thread_ids.push(parse_id(other)?),
        }
    }

    if parsed.thread_ids.is_empty() {
        bail!("thread requires at least one thread id");
    }
    Ok(parsed)
}
