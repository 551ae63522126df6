use std::env;
use threadview::RecordStore;
use threadview::config::Config;
use threadview::db::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <search_query>", args[0]);
        eprintln!("Search query matches against sender or subject.");
        std::process::exit(1);
    }

    let query = &args[1];
    let config = Config::load();
    let db = Database::new(&config.database_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

    let separator = "-".repeat(80);
    match db.search_latest(query).await? {
        Some(email) => {
            let thread_size = db.thread_count(email.thread_id).await?;

            println!("Found Email:");
            println!("ID: {}", email.id);
            println!("IMAP ID: {:?}", email.imap_id);
            println!("In-Reply-To: {:?}", email.in_reply_to);
            println!("From: {}", email.from);
            println!("Subject: {}", email.subject);
            println!("Date: {}", email.date.to_rfc3339());
            println!("Thread: {} ({} emails)", email.thread_id, thread_size);
            println!("{}", separator);
            println!("CONTENT (Raw Debug):");
            println!("{:?}", email.content);
            println!("{}", separator);
            println!("ORIGINAL SOURCE:");
            println!("{}", email.original_content);
            println!("{}", separator);
        }
        None => println!("No emails found matching '{}'", query),
    }

    Ok(())
}
