use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use gotwiki::cache::{CacheLayer, CacheStorage, Cacheable, SqliteStorage, TaskScope};
use gotwiki::config::{self, Config};
use gotwiki::logging;
use gotwiki::wiki::{Book, IceAndFireClient, RepositoryOptions, WikiRepository};

#[derive(Parser, Debug)]
#[command(name = "gotwiki")]
#[command(about = "Browse the An API of Ice and Fire catalogue from a local cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/gotwiki/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Increase log verbosity (-v debug, -vv trace)
  #[arg(short, long, action = clap::ArgAction::Count, global = true)]
  verbose: u8,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List a collection, ordered by name
  List {
    resource: Resource,

    /// Number of pages to read
    #[arg(long, default_value_t = 1)]
    pages: u32,
  },
  /// Show one book by URL
  Book { url: String },
  /// Show a cached character with its books
  Character { url: String },
  /// Delete every cached record
  Clear,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Resource {
  Books,
  Characters,
  Houses,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config::data_dir()?, args.verbose)?;

  let storage = Arc::new(SqliteStorage::open(&config.cache.database_path()?)?);
  let remote = Arc::new(IceAndFireClient::new(&config.api)?);
  let repo = WikiRepository::new(
    remote,
    storage,
    TaskScope::current()?,
    RepositoryOptions::from(&config),
  );

  match args.command {
    Command::List { resource, pages } => match resource {
      Resource::Books => list(repo.books(), pages).await?,
      Resource::Characters => list(repo.characters(), pages).await?,
      Resource::Houses => list(repo.houses(), pages).await?,
    },
    Command::Book { url } => show_book(&repo, &url).await?,
    Command::Character { url } => show_character(&repo, &url).await?,
    Command::Clear => {
      repo.clear_cache().await?;
      println!("Cache cleared");
    }
  }

  // Let background refreshes land in the cache before exiting
  repo.scope().wait_idle().await;
  info!("Done");

  Ok(())
}

async fn list<T, S>(layer: &CacheLayer<T, S>, pages: u32) -> Result<()>
where
  T: Cacheable,
  S: CacheStorage + 'static,
{
  let mut rows = layer.get().await?;
  for _ in 1..pages {
    let more = layer.load_more().await?;
    if more.is_empty() {
      break;
    }
    rows.extend(more);
  }

  for row in &rows {
    println!("{:<40} {}", row.name(), row.cache_key());
  }
  if !layer.has_more() {
    println!("(end of collection)");
  }
  Ok(())
}

async fn show_book(repo: &WikiRepository, url: &str) -> Result<()> {
  let book = match repo.books().get_by_url(url)? {
    Some(book) => Some(book),
    None => repo.books_by_urls(&[url.to_string()]).await?.into_iter().next(),
  };

  match book {
    Some(book) => print_book(&book),
    None => println!("No book at {}", url),
  }
  Ok(())
}

fn print_book(book: &Book) {
  println!("{}", book.name);
  println!("  ISBN:      {}", book.isbn);
  println!("  Authors:   {}", book.authors.join(", "));
  println!("  Pages:     {}", book.number_of_pages);
  println!("  Publisher: {}", book.publisher);
  println!("  Released:  {}", book.released);
  if let Some(cover) = &book.cover_image_url {
    println!("  Cover:     {}", cover);
  }
}

async fn show_character(repo: &WikiRepository, url: &str) -> Result<()> {
  let Some(resolved) = repo.character_with_books(url).await? else {
    println!("Character {} is not cached; try `gotwiki list characters`", url);
    return Ok(());
  };

  let character = &resolved.character;
  println!("{}", character.name);
  if !character.culture.is_empty() {
    println!("  Culture: {}", character.culture);
  }
  if !character.aliases.is_empty() {
    println!("  Aliases: {}", character.aliases.join(", "));
  }

  println!("  Books:");
  for book in &resolved.books {
    println!("    {}", book.name);
  }
  println!("  POV books:");
  for book in &resolved.pov_books {
    println!("    {}", book.name);
  }
  Ok(())
}
