use admin_sync::api::{ActionVerb, HttpTransport, Transport};
use admin_sync::config::Config;
use admin_sync::overlay::{
  ActionOutcome, ListFilters, ListOptions, ListSnapshot, OptimisticList, SortKey, SortOrder,
};
use admin_sync::payload::ItemId;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "admin-sync")]
#[command(about = "Browse and act on admin console collections")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/admin-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Collection to work on, e.g. requests or orders
  #[arg(short, long)]
  resource: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List items
  List {
    /// Server-side search text
    #[arg(short, long)]
    search: Option<String>,

    /// Only show items with this status ("all" shows every status)
    #[arg(long)]
    status: Option<String>,

    /// First creation date to include (YYYY-MM-DD, needs --to)
    #[arg(long)]
    from: Option<NaiveDate>,

    /// Last creation date to include (YYYY-MM-DD, needs --from)
    #[arg(long)]
    to: Option<NaiveDate>,

    #[arg(long, value_enum, default_value_t = SortKey::CreatedAt)]
    sort_by: SortKey,

    #[arg(long, value_enum, default_value_t = SortOrder::Desc)]
    order: SortOrder,

    #[arg(short, long, default_value_t = 1)]
    page: usize,

    /// Print the page as JSON
    #[arg(long)]
    json: bool,
  },
  /// Approve an item
  Approve { id: String },
  /// Cancel an item
  Cancel { id: String },
  /// Delete an item
  Delete { id: String },
  /// Run one action on several items
  Bulk {
    #[arg(value_enum)]
    verb: ActionVerb,
    #[arg(required = true)]
    ids: Vec<String>,
  },
}

/// Log to a file in the user data directory; the terminal is for output.
fn init_tracing() -> Result<Option<WorkerGuard>> {
  let Some(data_dir) = dirs::data_dir() else {
    return Ok(None);
  };
  let log_dir = data_dir.join("admin-sync");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::never(&log_dir, "admin-sync.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  let filter = EnvFilter::try_from_env("ADMIN_SYNC_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(Some(guard))
}

fn print_page(snapshot: &ListSnapshot) {
  if snapshot.items.is_empty() {
    println!("No items");
    return;
  }
  println!("{:<12} {:<12} {}", "ID", "STATUS", "CREATED");
  for item in &snapshot.items {
    println!(
      "{:<12} {:<12} {}",
      item.id.as_ref().map(ItemId::as_str).unwrap_or("-"),
      item.status.as_deref().unwrap_or("-"),
      item.created_at.as_deref().unwrap_or("-"),
    );
  }
  println!(
    "\nPage {}/{} ({} items)",
    snapshot.page, snapshot.total_pages, snapshot.total_items
  );
}

async fn run_action(list: &OptimisticList, verb: ActionVerb, id: String) -> Result<()> {
  match list.perform_action(verb, id.clone()).await? {
    ActionOutcome::Applied => println!("{} {}: ok", verb, id),
    ActionOutcome::Ignored => println!("{} {}: already in progress", verb, id),
  }
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let _log_guard = init_tracing()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let resource = args
    .resource
    .unwrap_or_else(|| config.default_resource.clone());
  let options = ListOptions::from_config(config.cache.policy()?, &config.overlay);

  let transport: Arc<dyn Transport> = Arc::new(HttpTransport::from_config(&config)?);
  let list = OptimisticList::with_global_cache(resource.clone(), transport, options);
  info!("admin-sync started for {}", resource);

  match args.command {
    Command::List {
      search,
      status,
      from,
      to,
      sort_by,
      order,
      page,
      json,
    } => {
      if let Some(search) = search {
        list.submit_search(search).await?;
      } else {
        list.load().await?;
      }

      let mut filters = ListFilters {
        query: list.filters().query,
        date_from: from,
        date_to: to,
        sort_by,
        sort_order: order,
        ..ListFilters::default()
      };
      if let Some(status) = status {
        filters = filters.with_status(&status);
      }
      list.set_filters(filters);
      list.set_page(page);

      let snapshot = list.snapshot();
      if json {
        println!("{}", serde_json::to_string_pretty(&snapshot.items)?);
      } else {
        print_page(&snapshot);
      }
    }
    Command::Approve { id } => run_action(&list, ActionVerb::Approve, id).await?,
    Command::Cancel { id } => run_action(&list, ActionVerb::Cancel, id).await?,
    Command::Delete { id } => run_action(&list, ActionVerb::Delete, id).await?,
    Command::Bulk { verb, ids } => {
      let ids = ids.into_iter().map(ItemId::from).collect();
      let outcome = list.perform_bulk_action(verb, ids).await;
      for id in &outcome.succeeded {
        println!("{} {}: ok", verb, id);
      }
      for id in &outcome.skipped {
        println!("{} {}: already in progress", verb, id);
      }
      for (id, e) in &outcome.failed {
        println!("{} {}: {}", verb, id, e);
      }
      if !outcome.failed.is_empty() {
        list.dispose();
        return Err(eyre!("{} of the items failed", outcome.failed.len()));
      }
    }
  }

  list.dispose();
  Ok(())
}
