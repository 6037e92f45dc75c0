use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rag_daemon::{Daemon, DaemonConfig, is_running};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "rag")]
#[command(about = "Local document indexing and hybrid search")]
struct Cli {
  /// Daemon HTTP port (default: from config)
  #[arg(long, global = true)]
  port: Option<u16>,
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Start the daemon
  Daemon {
    #[arg(long)]
    foreground: bool,
  },
  /// Queue the configured knowledge base for indexing
  Index {
    /// Re-embed and re-chunk files even if unchanged
    #[arg(long)]
    force: bool,
  },
  /// Run a hybrid search query
  Search {
    query: String,
    #[arg(short, long, default_value = "10")]
    limit: usize,
    #[arg(long, default_value = "0.0")]
    threshold: f64,
    /// Disable BM25 fusion, vector search only
    #[arg(long)]
    vector_only: bool,
    #[arg(long)]
    json: bool,
  },
  /// Pause background indexing
  Pause,
  /// Resume background indexing
  Resume,
  /// Show queue and pipeline status
  Status,
  /// List indexed documents
  Documents,
  /// Show one document by source path
  Document { path: String },
  /// Delete a document and its chunks, vectors, and FTS entries
  Delete { path: String },
  /// Bump a file's queue priority
  Reprioritize {
    path: String,
    #[arg(long)]
    force: bool,
  },
  /// Maintenance operations
  #[command(subcommand)]
  Maintenance(MaintenanceCommands),
  /// Health check
  Health,
}

#[derive(Subcommand)]
enum MaintenanceCommands {
  /// Re-enqueue files whose progress row was orphaned by a crash
  ReindexOrphans,
  /// Re-enqueue a file or every indexable file under a directory
  ReindexPath {
    path: String,
    #[arg(long)]
    dry_run: bool,
  },
  /// Rebuild the BM25 keyword index
  RebuildFts {
    #[arg(long)]
    dry_run: bool,
  },
  /// Rebuild the vector ANN index
  RebuildHnsw {
    #[arg(long)]
    dry_run: bool,
  },
}

fn data_dir() -> PathBuf {
  rag_store::default_data_dir()
}

fn init_cli_logging() {
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
    .init();
}

/// Returns the guard that must be kept alive for the duration of the program.
fn init_daemon_logging() -> Option<WorkerGuard> {
  let log_dir = data_dir();
  if std::fs::create_dir_all(&log_dir).is_err() {
    init_cli_logging();
    return None;
  }

  let file_appender = tracing_appender::rolling::daily(&log_dir, "ragd.log");
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
  let env_filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
  let console_layer = tracing_subscriber::fmt::layer().with_target(true).with_ansi(true);
  let file_layer = tracing_subscriber::fmt::layer().with_target(true).with_ansi(false).with_writer(file_writer);

  tracing_subscriber::registry().with(env_filter).with(console_layer).with(file_layer).init();
  Some(guard)
}

fn base_url(port: u16) -> String {
  format!("http://127.0.0.1:{port}")
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();
  let port = cli.port.unwrap_or_else(rag_store::default_port);

  let _guard = match &cli.command {
    Commands::Daemon { .. } => init_daemon_logging(),
    _ => {
      init_cli_logging();
      None
    }
  };

  let result = match cli.command {
    Commands::Daemon { foreground: _ } => cmd_daemon().await,
    Commands::Index { force } => cmd_index(port, force).await,
    Commands::Search { query, limit, threshold, vector_only, json } => cmd_search(port, &query, limit, threshold, !vector_only, json).await,
    Commands::Pause => cmd_pause(port).await,
    Commands::Resume => cmd_resume(port).await,
    Commands::Status => cmd_status(port).await,
    Commands::Documents => cmd_documents(port).await,
    Commands::Document { path } => cmd_document(port, &path).await,
    Commands::Delete { path } => cmd_delete(port, &path).await,
    Commands::Reprioritize { path, force } => cmd_reprioritize(port, &path, force).await,
    Commands::Maintenance(cmd) => cmd_maintenance(port, cmd).await,
    Commands::Health => cmd_health(port).await,
  };

  if let Err(e) = &result {
    error!("{e:#}");
    std::process::exit(1);
  }
  result
}

async fn cmd_daemon() -> Result<()> {
  let config = DaemonConfig::default();
  let mut daemon = Daemon::new(config);

  info!("starting daemon");
  daemon.run().await.context("daemon exited with an error")?;
  Ok(())
}

fn require_running(port: u16) -> Result<()> {
  if !is_running(port) {
    bail!("daemon is not running on port {port}. Start it with: rag daemon");
  }
  Ok(())
}

async fn cmd_index(port: u16, force: bool) -> Result<()> {
  require_running(port)?;
  let client = reqwest::Client::new();
  let resp: serde_json::Value = client
    .post(format!("{}/index", base_url(port)))
    .json(&serde_json::json!({ "force_reindex": force }))
    .send()
    .await
    .context("failed to reach daemon")?
    .error_for_status()
    .context("index request failed")?
    .json()
    .await?;
  let queued = resp.get("queued").and_then(|v| v.as_u64()).unwrap_or(0);
  println!("queued {queued} files for indexing");
  Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_search(port: u16, query: &str, limit: usize, threshold: f64, use_hybrid: bool, json_output: bool) -> Result<()> {
  require_running(port)?;
  let client = reqwest::Client::new();
  let resp: serde_json::Value = client
    .post(format!("{}/query", base_url(port)))
    .json(&serde_json::json!({
        "text": query,
        "top_k": limit,
        "threshold": threshold,
        "use_hybrid": use_hybrid,
    }))
    .send()
    .await
    .context("failed to reach daemon")?
    .error_for_status()
    .context("query failed")?
    .json()
    .await?;

  if json_output {
    println!("{}", serde_json::to_string_pretty(&resp)?);
    return Ok(());
  }

  let results = resp.get("results").and_then(|v| v.as_array()).cloned().unwrap_or_default();
  if results.is_empty() {
    println!("no results for: {query}");
    return Ok(());
  }

  println!("{} results:\n", results.len());
  for (i, hit) in results.iter().enumerate() {
    let source = hit.get("source").and_then(|v| v.as_str()).unwrap_or("?");
    let score = hit.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0);
    let page = hit.get("page").and_then(|v| v.as_u64());
    match page {
      Some(p) => println!("{}. {} (p.{p}) [{:.3}]", i + 1, source, score),
      None => println!("{}. {} [{:.3}]", i + 1, source, score),
    }
    if let Some(content) = hit.get("content").and_then(|v| v.as_str()) {
      let preview = if content.len() > 200 { format!("{}...", &content[..200]) } else { content.to_string() };
      println!("   {}", preview.replace('\n', "\n   "));
    }
    println!();
  }
  Ok(())
}

async fn cmd_pause(port: u16) -> Result<()> {
  require_running(port)?;
  reqwest::Client::new().post(format!("{}/indexing/pause", base_url(port))).send().await?.error_for_status()?;
  println!("indexing paused");
  Ok(())
}

async fn cmd_resume(port: u16) -> Result<()> {
  require_running(port)?;
  reqwest::Client::new().post(format!("{}/indexing/resume", base_url(port))).send().await?.error_for_status()?;
  println!("indexing resumed");
  Ok(())
}

async fn cmd_status(port: u16) -> Result<()> {
  require_running(port)?;
  let client = reqwest::Client::new();
  let status: serde_json::Value = client.get(format!("{}/indexing/status", base_url(port))).send().await?.error_for_status()?.json().await?;
  let stats: serde_json::Value = client.get(format!("{}/queue/jobs", base_url(port))).send().await?.error_for_status()?.json().await?;

  println!("queue size:     {}", status.get("queue_size").and_then(|v| v.as_u64()).unwrap_or(0));
  println!("paused:         {}", status.get("paused").and_then(|v| v.as_bool()).unwrap_or(false));
  println!("worker running: {}", status.get("worker_running").and_then(|v| v.as_bool()).unwrap_or(false));
  println!();
  println!("chunk workers active: {}", stats.get("chunk_active").and_then(|v| v.as_u64()).unwrap_or(0));
  println!("embed workers active: {}", stats.get("embed_active").and_then(|v| v.as_u64()).unwrap_or(0));
  println!("store workers active: {}", stats.get("store_active").and_then(|v| v.as_u64()).unwrap_or(0));
  Ok(())
}

async fn cmd_documents(port: u16) -> Result<()> {
  require_running(port)?;
  let docs: Vec<serde_json::Value> = reqwest::Client::new().get(format!("{}/documents", base_url(port))).send().await?.error_for_status()?.json().await?;
  if docs.is_empty() {
    println!("no documents indexed");
    return Ok(());
  }
  for doc in docs {
    let source = doc.get("source").and_then(|v| v.as_str()).unwrap_or("?");
    let chunks = doc.get("chunk_count").and_then(|v| v.as_u64()).unwrap_or(0);
    println!("{source} ({chunks} chunks)");
  }
  Ok(())
}

async fn cmd_document(port: u16, path: &str) -> Result<()> {
  require_running(port)?;
  let encoded = urlencoding_path(path);
  let resp = reqwest::Client::new().get(format!("{}/document/{encoded}", base_url(port))).send().await?;
  if resp.status() == reqwest::StatusCode::BAD_REQUEST {
    println!("no document for {path}");
    return Ok(());
  }
  let doc: serde_json::Value = resp.error_for_status()?.json().await?;
  println!("{}", serde_json::to_string_pretty(&doc)?);
  Ok(())
}

async fn cmd_delete(port: u16, path: &str) -> Result<()> {
  require_running(port)?;
  let encoded = urlencoding_path(path);
  reqwest::Client::new().delete(format!("{}/document/{encoded}", base_url(port))).send().await?.error_for_status()?;
  println!("deleted {path}");
  Ok(())
}

async fn cmd_reprioritize(port: u16, path: &str, force: bool) -> Result<()> {
  require_running(port)?;
  let encoded = urlencoding_path(path);
  let url = format!("{}/indexing/priority/{encoded}?force={force}", base_url(port));
  reqwest::Client::new().post(url).send().await?.error_for_status()?;
  println!("requeued {path} at high priority");
  Ok(())
}

async fn cmd_maintenance(port: u16, cmd: MaintenanceCommands) -> Result<()> {
  require_running(port)?;
  let client = reqwest::Client::new();
  let resp: serde_json::Value = match cmd {
    MaintenanceCommands::ReindexOrphans => {
      client.post(format!("{}/api/maintenance/reindex-orphaned-files", base_url(port))).send().await?.error_for_status()?.json().await?
    }
    MaintenanceCommands::ReindexPath { path, dry_run } => {
      client
        .post(format!("{}/api/maintenance/reindex-path", base_url(port)))
        .json(&serde_json::json!({ "path": path, "dry_run": dry_run }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?
    }
    MaintenanceCommands::RebuildFts { dry_run } => {
      client
        .post(format!("{}/api/maintenance/rebuild-fts", base_url(port)))
        .json(&serde_json::json!({ "dry_run": dry_run }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?
    }
    MaintenanceCommands::RebuildHnsw { dry_run } => {
      client
        .post(format!("{}/api/maintenance/rebuild-hnsw", base_url(port)))
        .json(&serde_json::json!({ "dry_run": dry_run }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?
    }
  };

  let affected = resp.get("affected").and_then(|v| v.as_u64()).unwrap_or(0);
  let dry_run = resp.get("dry_run").and_then(|v| v.as_bool()).unwrap_or(false);
  if dry_run {
    println!("dry run: {affected} items would be affected");
  } else {
    println!("{affected} items affected");
  }
  Ok(())
}

async fn cmd_health(port: u16) -> Result<()> {
  println!("Daemon health");
  println!("=============\n");

  if !is_running(port) {
    println!("status:    NOT RUNNING");
    println!("port:      {port}");
    bail!("daemon is not running. Start it with: rag daemon");
  }

  let health: serde_json::Value = reqwest::Client::new().get(format!("{}/health", base_url(port))).send().await?.error_for_status()?.json().await?;

  println!("status:             {}", health.get("status").and_then(|v| v.as_str()).unwrap_or("?"));
  println!("indexed documents:  {}", health.get("indexed_documents").and_then(|v| v.as_u64()).unwrap_or(0));
  println!("total chunks:       {}", health.get("total_chunks").and_then(|v| v.as_u64()).unwrap_or(0));
  println!("indexing active:    {}", health.get("indexing_in_progress").and_then(|v| v.as_bool()).unwrap_or(false));
  Ok(())
}

/// Minimal path-segment escaping for the daemon's `{filename}`/`{path}` route
/// params; these are always a single relative or absolute file path.
fn urlencoding_path(path: &str) -> String {
  path.replace('%', "%25").replace('/', "%2F")
}
