use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use ordina_store::{MessageStore, SqliteStore};
use ordina_view::render::{format_mentions, reaction_summary};
use ordina_view::{ChannelMessageView, PAGE_SIZE};

// Seeded defaults so repeated runs land in the same channel as the same
// member unless the environment says otherwise.
const DEFAULT_CHANNEL: Uuid = Uuid::from_u128(1);
const DEFAULT_USER: Uuid = Uuid::from_u128(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ordina=debug".into()),
        )
        .init();

    // Config
    let db_path = std::env::var("ORDINA_DB_PATH").unwrap_or_else(|_| "ordina.db".into());
    let user_name = std::env::var("ORDINA_USER").unwrap_or_else(|_| "Ada Lovelace".into());

    let store = Arc::new(SqliteStore::open(&PathBuf::from(&db_path))?);
    store.create_channel(DEFAULT_CHANNEL, "general")?;
    store.create_profile(DEFAULT_USER, Some(&user_name))?;

    let initial = store
        .fetch_recent(DEFAULT_CHANNEL, PAGE_SIZE)
        .await
        .context("loading initial messages")?;
    let view = ChannelMessageView::new(store.clone(), DEFAULT_CHANNEL, DEFAULT_USER, initial);

    // Pump the change feed into the view.
    let mut feed = store.subscribe();
    let pump = view.clone();
    tokio::spawn(async move {
        loop {
            match feed.recv().await {
                Ok(event) => pump.handle_event(event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "change feed lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    info!("Ordina shell on #general as {} ({})", user_name, DEFAULT_USER);
    println!("Commands: /reply N, /pin N, /react N EMOJI, /older, /list, /quit.");
    println!("Anything else is sent as a message.");
    print_messages(&view).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        match line.split_whitespace().collect::<Vec<_>>().as_slice() {
            ["/quit"] => break,
            ["/list"] => {}
            ["/older"] => view.load_older().await,
            ["/reply", index] => match message_at(&view, index).await {
                Some(id) => view.set_reply_target(Some(id)).await,
                None => println!("no such message"),
            },
            ["/pin", index] => match message_at(&view, index).await {
                Some(id) => view.toggle_pin(id).await,
                None => println!("no such message"),
            },
            ["/react", index, emoji] => match message_at(&view, index).await {
                Some(id) => view.toggle_reaction(id, emoji).await,
                None => println!("no such message"),
            },
            _ => {
                view.set_composer(&line).await;
                view.send().await;
                // Give the feed pump a beat to merge the echo.
                tokio::task::yield_now().await;
            }
        }

        print_messages(&view).await;
    }

    Ok(())
}

async fn message_at(view: &ChannelMessageView, index: &str) -> Option<Uuid> {
    let index: usize = index.parse().ok()?;
    view.messages().await.get(index).map(|m| m.id)
}

async fn print_messages(view: &ChannelMessageView) {
    let messages = view.messages().await;
    if messages.is_empty() {
        println!("  (no messages yet)");
        return;
    }

    let current_user = view.current_user();
    for (index, message) in messages.iter().enumerate() {
        let indent = if message.is_reply() { "    " } else { "" };
        let pin = if message.is_pinned { " [pinned]" } else { "" };

        println!(
            "{indent}[{index}] {}{} — {}",
            message.author_name(),
            pin,
            message.created_at.format("%H:%M:%S"),
        );
        println!("{indent}    {}", format_mentions(&message.body));

        let badges: Vec<String> = reaction_summary(message, current_user)
            .into_iter()
            .filter(|b| b.count > 0)
            .map(|b| {
                let marker = if b.reacted { "*" } else { "" };
                format!("{} {}{}", b.emoji, b.count, marker)
            })
            .collect();
        if !badges.is_empty() {
            println!("{indent}    {}", badges.join("  "));
        }
    }

    if let Some(target) = view.reply_target().await {
        if let Some(pos) = messages.iter().position(|m| m.id == target) {
            println!("replying to [{pos}] — /reply clears with a send");
        }
    }
}
