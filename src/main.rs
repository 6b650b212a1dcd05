use clap::{Parser, Subcommand};
use color_eyre::{eyre::WrapErr, Result};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use devbytes_cache::config::Config;
use devbytes_cache::devbytes::{open_repository, Video};
use devbytes_cache::logging;

#[derive(Parser, Debug)]
#[command(name = "devbytes")]
#[command(about = "Offline-first cache for the DevBytes video playlist")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/devbytes/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Path to the cache database (overrides store.path)
  #[arg(short, long)]
  database: Option<PathBuf>,

  /// Mirror logs to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch the playlist once and store it
  Refresh,
  /// Print the cached playlist without touching the network
  List,
  /// Print the playlist on every change while refreshing periodically
  Watch {
    /// Seconds between refreshes (default: refresh.interval_secs)
    #[arg(short, long)]
    interval: Option<u64>,
  },
  /// Show when the cache was last refreshed
  Status,
  /// Delete the cached playlist
  Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;
  if args.verbose {
    config.logging.stderr = true;
  }
  let _log_guard = logging::init(&config.logging)?;

  let database = match args.database {
    Some(path) => path,
    None => config.database_path()?,
  };
  let cancel = CancellationToken::new();
  let repo = open_repository(&config, &database, cancel.clone())?;
  info!(database = %database.display(), command = ?args.command, "starting");

  match args.command {
    Command::Refresh => {
      let outcome = repo.refresh().await.wrap_err("Refresh failed")?;
      println!(
        "Stored {} videos at {}",
        outcome.record_count,
        outcome.refreshed_at.to_rfc3339()
      );
    }
    Command::List => print_videos(&repo.observe().current()),
    Command::Watch { interval } => {
      let interval = interval
        .map(|secs| Duration::from_secs(secs.max(1)))
        .unwrap_or_else(|| config.refresh.interval());
      let worker = repo.spawn_periodic(interval);
      let mut updates = Box::pin(repo.observe().into_stream());

      loop {
        tokio::select! {
          _ = tokio::signal::ctrl_c() => break,
          _ = cancel.cancelled() => break,
          update = updates.next() => match update {
            Some(videos) => print_videos(&videos),
            None => break,
          },
        }
      }

      repo.shutdown();
      worker.await.wrap_err("Refresh worker panicked")?;
    }
    Command::Status => match repo.store().metadata()? {
      Some(meta) => {
        println!("Collection:   {}", meta.description);
        println!("Videos:       {}", meta.item_count);
        println!("Refreshed at: {}", meta.refreshed_at.to_rfc3339());
        if let Some(updated) = meta.max_updated {
          println!("Newest video: {}", updated.to_rfc3339());
        }
      }
      None => println!("Never refreshed"),
    },
    Command::Clear => {
      repo.store().clear()?;
      println!("Cleared cached playlist");
    }
  }

  Ok(())
}

fn print_videos(videos: &[Video]) {
  if videos.is_empty() {
    println!("(no cached videos; run `devbytes refresh`)");
    return;
  }

  for video in videos {
    println!("{}  {}", video.updated.format("%Y-%m-%d"), video.title);
    println!("    {}", video.url);
    if !video.short_description.is_empty() {
      println!("    {}", video.short_description);
    }
  }
  println!();
}
