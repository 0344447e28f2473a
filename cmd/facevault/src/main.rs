//! facevault - face enrollment and recognition service.

mod config;
mod server;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facevault_embed::{FaceEmbedder, HashEmbedder, HttpEmbedder};
use facevault_pipeline::{
    DirWatcher, EnrollResult, EnrollWorker, Pipeline, PipelineError, WorkerSummary, drain, is_image,
    parse_user_id, scan_dir,
};
use facevault_profile::{ProfileStore, RedbProfileStore, import_file};
use facevault_vecstore::RebuildOutcome;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::{AppConfig, EmbedderKind};

/// Face enrollment and recognition over a staged vector index.
#[derive(Parser)]
#[command(name = "facevault")]
#[command(about = "Face enrollment and recognition service")]
#[command(version)]
struct Cli {
    /// Config file (default is ~/.facevault/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API (and the watcher, if watch_dir is configured)
    Serve {
        /// Listen address (e.g. :5000)
        #[arg(long)]
        listen: Option<String>,
    },
    /// Enroll photos as they appear in a directory
    Watch {
        /// Directory to watch (default: watch_dir from config)
        dir: Option<PathBuf>,
    },
    /// Enroll photo files or every photo in directories, then rebuild once
    Enroll {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Fold all staged embeddings into a new index snapshot
    Rebuild,
    /// List enrolled identities
    Users {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Merge profile metadata from a YAML file
    ImportProfiles { file: PathBuf },
    /// Show index status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let cfg = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { listen } => serve(&cfg, listen).await,
        Commands::Watch { dir } => {
            let dir = dir
                .or_else(|| cfg.watch_dir.clone())
                .context("no directory given and watch_dir is not configured")?;
            watch(&cfg, &dir).await
        }
        Commands::Enroll { paths } => enroll(&cfg, &paths).await,
        Commands::Rebuild => rebuild(&cfg).await,
        Commands::Users { json } => users(&cfg, json),
        Commands::ImportProfiles { file } => {
            let store = open_profiles(&cfg)?;
            let n = import_file(store.as_ref(), &file)?;
            println!("imported {n} profiles");
            Ok(())
        }
        Commands::Status => {
            let pipeline = open_pipeline(&cfg)?;
            println!("{}", serde_json::to_string_pretty(&status_json(&pipeline))?);
            Ok(())
        }
    }
}

fn open_profiles(cfg: &AppConfig) -> Result<Arc<dyn ProfileStore>> {
    let path = cfg.profiles_path()?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create data dir {}", dir.display()))?;
    }
    Ok(Arc::new(RedbProfileStore::open(&path)?))
}

fn open_embedder(cfg: &AppConfig) -> Arc<dyn FaceEmbedder> {
    let dim = cfg.pipeline.dimension;
    match cfg.embedder.kind {
        EmbedderKind::Http => Arc::new(HttpEmbedder::with_config(cfg.embedder.embed_config(dim))),
        EmbedderKind::Hash => Arc::new(HashEmbedder::new(dim)),
    }
}

fn open_pipeline(cfg: &AppConfig) -> Result<Pipeline> {
    let pipeline = Pipeline::open(
        cfg.pipeline.clone(),
        open_embedder(cfg),
        open_profiles(cfg)?,
        Some(cfg.snapshot_path()?),
    )?;
    let stats = pipeline.index.stats();
    info!(
        generation = stats.generation,
        indexed = stats.indexed,
        "facevault: pipeline ready"
    );
    Ok(pipeline)
}

fn status_json(pipeline: &Pipeline) -> serde_json::Value {
    let stats = pipeline.index.stats();
    serde_json::json!({
        "generation": stats.generation,
        "indexed": stats.indexed,
        "staged": stats.staged,
        "dimension": pipeline.index.dimension(),
    })
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("facevault: shutting down");
        }
        token.cancel();
    });
}

/// Start the directory watcher and its enroll worker. The watcher stops
/// when the returned value is dropped.
async fn start_watcher(
    pipeline: &Pipeline,
    dir: &Path,
) -> Result<(DirWatcher, JoinHandle<WorkerSummary>)> {
    let (tx, rx) = mpsc::channel(pipeline.config.queue_capacity);
    let worker = EnrollWorker::spawn(pipeline.enrollment.clone(), rx);
    let watcher = DirWatcher::start(dir, tx.clone())?;
    let queued = scan_dir(dir, &tx).await?;
    info!(queued, dir = %dir.display(), "facevault: queued existing photos");
    Ok((watcher, worker))
}

/// Enroll photos still queued, then let the final rebuild fold them.
async fn stop_watcher(watcher: DirWatcher, worker: JoinHandle<WorkerSummary>) {
    if let Err(e) = drain(watcher, worker).await {
        warn!(error = %e, "facevault: enroll worker did not finish");
    }
}

/// Persist anything still staged before exiting.
async fn final_rebuild(pipeline: &Pipeline) {
    if pipeline.index.stats().staged == 0 {
        return;
    }
    if let Err(e) = pipeline.index.rebuild().await {
        warn!(error = %e, "facevault: final rebuild failed");
    }
}

async fn serve(cfg: &AppConfig, listen: Option<String>) -> Result<()> {
    let pipeline = open_pipeline(cfg)?;
    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());
    let ticker = pipeline.index.spawn_ticker(&pipeline.config, shutdown.clone());

    let watcher = match &cfg.watch_dir {
        Some(dir) => Some(start_watcher(&pipeline, dir).await?),
        None => None,
    };

    let addr = listen.unwrap_or_else(|| cfg.listen.clone());
    server::serve(&addr, pipeline.clone(), shutdown.clone()).await?;

    shutdown.cancel();
    ticker.await.ok();
    if let Some((watcher, worker)) = watcher {
        stop_watcher(watcher, worker).await;
    }
    final_rebuild(&pipeline).await;
    Ok(())
}

async fn watch(cfg: &AppConfig, dir: &Path) -> Result<()> {
    let pipeline = open_pipeline(cfg)?;
    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());
    let ticker = pipeline.index.spawn_ticker(&pipeline.config, shutdown.clone());

    let (watcher, worker) = start_watcher(&pipeline, dir).await?;
    shutdown.cancelled().await;

    stop_watcher(watcher, worker).await;
    ticker.await.ok();
    final_rebuild(&pipeline).await;
    Ok(())
}

/// Expand directories into the photos they contain, sorted by name.
fn collect_photos(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut photos = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = std::fs::read_dir(path)
                .with_context(|| format!("read dir {}", path.display()))?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_image(p))
                .collect();
            found.sort();
            photos.extend(found);
        } else if is_image(path) {
            photos.push(path.clone());
        } else {
            warn!(path = %path.display(), "facevault: not a photo, skipped");
        }
    }
    Ok(photos)
}

async fn enroll_file(pipeline: &Pipeline, path: &Path) -> Result<EnrollResult, PipelineError> {
    let user_id = parse_user_id(path)?;
    let photo = tokio::fs::read(path).await?;
    pipeline.enrollment.enroll(&user_id, &photo).await
}

async fn enroll(cfg: &AppConfig, paths: &[PathBuf]) -> Result<()> {
    let pipeline = open_pipeline(cfg)?;
    let photos = collect_photos(paths)?;

    let (mut enrolled, mut failed) = (0usize, 0usize);
    for path in &photos {
        match enroll_file(&pipeline, path).await {
            Ok(r) => {
                enrolled += 1;
                println!("{} {}", if r.created { "new" } else { "updated" }, r.user_id);
            }
            Err(e) => {
                failed += 1;
                warn!(path = %path.display(), error = %e, "facevault: enrollment failed");
            }
        }
    }

    let outcome = pipeline.index.rebuild().await?;
    println!(
        "enrolled {enrolled}, failed {failed}, index generation {}",
        outcome.generation()
    );
    Ok(())
}

async fn rebuild(cfg: &AppConfig) -> Result<()> {
    let pipeline = open_pipeline(cfg)?;
    match pipeline.index.rebuild().await? {
        RebuildOutcome::Rebuilt(r) => println!(
            "generation {} -> {}: {} entries, {} folded, {} dropped, {:?}",
            r.previous_generation,
            r.generation,
            r.indexed,
            r.folded.len(),
            r.dropped.len(),
            r.elapsed
        ),
        RebuildOutcome::Unchanged { generation, .. } => {
            println!("nothing staged, generation {generation} unchanged")
        }
        RebuildOutcome::Coalesced { generation } => {
            println!("rebuild already running, generation {generation}")
        }
    }
    Ok(())
}

fn users(cfg: &AppConfig, json: bool) -> Result<()> {
    let store = open_profiles(cfg)?;
    let users = store.list()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&users)?);
        return Ok(());
    }
    for u in &users {
        let face = u
            .face_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{:<24} {:<8} {:<24} {}", u.user_id, face, u.name, u.email);
    }
    Ok(())
}
