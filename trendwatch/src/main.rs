// trendwatch/src/main.rs
//
// trendwatch: detects abnormal surges in entity usage (hashtags, links,
// statuses) from a stream of public posts.
//
// Three operational modes:
//   tail     tail a JSONL post feed, refreshing on a schedule
//   replay   replay a captured feed at scaled speed
//   refresh  ingest a feed once, refresh, print the listing and exit
//
// tail and replay stamp each event with its arrival time, since the
// scheduled refresh scores at the wall clock. refresh keeps the feed's own
// timestamps and scores at the newest one.
//
// Usage:
//   trendwatch --mode tail --path /var/log/posts.jsonl
//   trendwatch --mode replay --path captured.jsonl --speed 60.0
//   trendwatch --mode refresh --path day.jsonl --entities entities.jsonl

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use trendwatch::engine::{housekeeping_loop, refresh::refresh_loop, review::review_loop};
use trendwatch::state::entities::MemoryEntityDirectory;
use trendwatch::{
    Collaborators, DaemonConfig, EntityKind, Links, ReviewDispatcher, Statuses, Tags, TrendEngine,
    TrendEntry, Trends, UsageEvent,
};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "trendwatch",
    about   = "Trending hashtags, links and statuses from a public post stream",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(long, value_enum, default_value = "tail")]
    mode: Mode,

    #[arg(long, default_value = "/tmp/trendwatch_feed.jsonl",
          help = "JSONL post feed")]
    path: PathBuf,

    #[arg(long, default_value = "1.0", help = "Replay speed multiplier")]
    speed: f64,

    #[arg(long, help = "Review output directory (overrides config)")]
    output: Option<PathBuf>,

    #[arg(long, help = "JSON config file")]
    config: Option<PathBuf>,

    #[arg(long, help = "JSONL entity directory to preload")]
    entities: Option<PathBuf>,

    #[arg(long, default_value = "10", help = "Entries shown per kind")]
    top: usize,
}

#[derive(Clone, ValueEnum)]
enum Mode {
    Tail,     // tail a live JSONL feed
    Replay,   // replay a static JSONL file at scaled speed
    Refresh,  // one-shot batch over a static file
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

struct Pipeline {
    engines:      Vec<Arc<dyn TrendEngine>>,
    directory:    Arc<MemoryEntityDirectory>,
    dispatcher:   Arc<ReviewDispatcher>,
    total_events: AtomicU64,
}

impl Pipeline {
    fn new(config: &DaemonConfig, directory: Arc<MemoryEntityDirectory>) -> Result<Self> {
        let shared = Collaborators::in_memory(directory.clone());
        let mut engines: Vec<Arc<dyn TrendEngine>> = Vec::new();
        for kind in &config.kinds {
            let stores = shared.with_fresh_records();
            let engine: Arc<dyn TrendEngine> = match kind {
                EntityKind::Tag    => Arc::new(Trends::new(Tags, config.trends.clone(), stores)?),
                EntityKind::Link   => Arc::new(Trends::new(Links, config.trends.clone(), stores)?),
                EntityKind::Status => Arc::new(Trends::new(Statuses, config.trends.clone(), stores)?),
            };
            engines.push(engine);
        }

        Ok(Self {
            engines,
            directory,
            dispatcher:   Arc::new(ReviewDispatcher::new(config.output_dir.clone())?),
            total_events: AtomicU64::new(0),
        })
    }

    fn process(&self, event: &UsageEvent) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        for engine in &self.engines {
            match engine.register(event, event.timestamp) {
                Ok(0) => {}
                Ok(_) => {
                    // first sighting: known from now on, pending review
                    for id in engine.extract(event) {
                        self.directory.ensure(engine.entity_kind(), &id);
                    }
                }
                Err(e) => warn!(kind = %engine.entity_kind(), status = %event.status_id, "register failed: {}", e),
            }
        }
    }
}

// ── Terminal output ───────────────────────────────────────────────────────────

fn print_banner() {
    println!("\x1b[1m");
    println!("  trendwatch");
    println!("\x1b[0m");
    println!("  \x1b[90mDecaying-anomaly trend scoring for hashtags and links\x1b[0m\n");
}

fn print_listing(kind: EntityKind, entries: &[TrendEntry]) {
    println!("\n\x1b[1m── trending {} ──\x1b[0m", kind);
    if entries.is_empty() {
        println!("  \x1b[90m(none)\x1b[0m");
        return;
    }
    for e in entries {
        let rank = e.rank.map(|r| format!("#{}", r)).unwrap_or_else(|| "-".into());
        println!("  {:>4}  \x1b[96m{:<32}\x1b[0m {:>10.2}  [{}]", rank, e.entity, e.score, e.language);
    }
}

async fn print_stats_loop(pipeline: Arc<Pipeline>, start: Instant, top: usize) {
    loop {
        tokio::time::sleep(Duration::from_secs(30)).await;
        let elapsed = start.elapsed().as_secs_f64();
        let events  = pipeline.total_events.load(Ordering::Relaxed);
        println!(
            "\n\x1b[1m── stats  uptime={:.0}s  events={}  eps={:.1}  entities={} ──\x1b[0m",
            elapsed, events, events as f64 / elapsed, pipeline.directory.len()
        );
        for engine in &pipeline.engines {
            println!("  {}: registered={}", engine.entity_kind(), engine.registered());
            match engine.currently_trending(top) {
                Ok(entries) => print_listing(engine.entity_kind(), &entries),
                Err(e)      => warn!(kind = %engine.entity_kind(), "listing failed: {}", e),
            }
        }
    }
}

// ── Event sources ─────────────────────────────────────────────────────────────

async fn tail_jsonl(path: PathBuf, tx: mpsc::Sender<UsageEvent>, seek_end: bool) -> Result<()> {
    let file      = tokio::fs::File::open(&path).await?;
    let mut lines = BufReader::new(file).lines();

    if seek_end {
        while lines.next_line().await?.is_some() {}
    }

    info!("Tailing {}", path.display());
    loop {
        match lines.next_line().await? {
            Some(line) => {
                let line = line.trim();
                if line.is_empty() { continue; }
                match parse_live_line(line, Utc::now()) {
                    Ok(ev) => { if tx.send(ev).await.is_err() { break; } }
                    Err(e) => warn!("Parse error: {}", e),
                }
            }
            None => tokio::time::sleep(Duration::from_millis(50)).await,
        }
    }
    Ok(())
}

/// Live lines are counted at arrival time: the refresh loop scores at the
/// wall clock, so a feed lagging behind it would otherwise never surface.
fn parse_live_line(line: &str, now: DateTime<Utc>) -> serde_json::Result<UsageEvent> {
    let mut event = serde_json::from_str::<UsageEvent>(line)?;
    event.timestamp = now;
    Ok(event)
}

fn read_events(content: &str) -> Vec<UsageEvent> {
    let mut events: Vec<UsageEvent> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter_map(|l| match serde_json::from_str::<UsageEvent>(l) {
            Ok(ev) => Some(ev),
            Err(e) => { warn!("Parse error: {}", e); None }
        })
        .collect();
    events.sort_by_key(|e| e.timestamp);
    events
}

async fn replay_jsonl(path: PathBuf, tx: mpsc::Sender<UsageEvent>, speed: f64) -> Result<()> {
    let content = tokio::fs::read_to_string(&path).await?;
    let events  = read_events(&content);
    let base_ts = match events.first() {
        Some(e) => e.timestamp,
        None    => return Ok(()),
    };
    let base_wall = Instant::now();

    for mut event in events {
        let offset = (event.timestamp - base_ts).num_milliseconds() as f64 / speed / 1000.0;
        let target = base_wall + Duration::from_secs_f64(offset.max(0.0));
        let now    = Instant::now();
        if target > now {
            tokio::time::sleep(target - now).await;
        }
        event.timestamp = Utc::now();
        if tx.send(event).await.is_err() { break; }
    }
    Ok(())
}

// ── Batch mode ────────────────────────────────────────────────────────────────

async fn run_once(pipeline: &Pipeline, path: &Path, top: usize) -> Result<()> {
    let content = tokio::fs::read_to_string(path).await?;
    let events  = read_events(&content);
    let at = match events.last() {
        Some(e) => e.timestamp,
        None    => {
            println!("  No events in {}", path.display());
            return Ok(());
        }
    };
    for event in &events {
        pipeline.process(event);
    }

    for engine in &pipeline.engines {
        let stats = engine.refresh(at)?;
        let items = engine.request_review(at)?;
        pipeline.dispatcher.dispatch(&items).await?;
        println!(
            "\n  {}: scored={} kept={} expired={} ranked={} review={}",
            engine.entity_kind(), stats.scored, stats.kept, stats.expired, stats.ranked, items.len()
        );
        print_listing(engine.entity_kind(), &engine.currently_trending(top)?);
    }
    Ok(())
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env()
            .add_directive("trendwatch=info".parse()?))
        .compact().init();

    let cli        = Cli::parse();
    anyhow::ensure!(cli.speed > 0.0, "--speed must be positive");
    let mut config = DaemonConfig::load(cli.config.as_deref())?;
    if let Some(out) = &cli.output {
        config.output_dir = out.clone();
    }

    let directory = Arc::new(MemoryEntityDirectory::new());
    if let Some(path) = &cli.entities {
        let n = directory.load_jsonl(path)?;
        info!("Loaded {} entities from {}", n, path.display());
    }

    let pipeline = Arc::new(Pipeline::new(&config, directory)?);
    let start    = Instant::now();

    print_banner();

    let (tx, mut rx) = mpsc::channel::<UsageEvent>(16384);

    match cli.mode {
        Mode::Refresh => {
            println!("  Mode: \x1b[92mREFRESH\x1b[0m  |  {}", cli.path.display());
            println!("  Output: \x1b[90m{}\x1b[0m", config.output_dir.display());
            return run_once(&pipeline, &cli.path, cli.top).await;
        }
        Mode::Tail => {
            println!("  Mode: \x1b[96mTAIL\x1b[0m  |  {}", cli.path.display());
            println!("  Output: \x1b[90m{}\x1b[0m\n", config.output_dir.display());
            let path = cli.path.clone();
            tokio::spawn(async move {
                if let Err(e) = tail_jsonl(path, tx, true).await { warn!("tail stopped: {}", e); }
            });
        }
        Mode::Replay => {
            println!("  Mode: \x1b[93mREPLAY\x1b[0m  |  {}  speed={:.1}x", cli.path.display(), cli.speed);
            println!("  Output: \x1b[90m{}\x1b[0m\n", config.output_dir.display());
            let path  = cli.path.clone();
            let speed = cli.speed;
            tokio::spawn(async move {
                if let Err(e) = replay_jsonl(path, tx, speed).await { warn!("replay stopped: {}", e); }
            });
        }
    }

    tokio::spawn(print_stats_loop(Arc::clone(&pipeline), start, cli.top));
    tokio::spawn(refresh_loop(
        pipeline.engines.clone(),
        Duration::from_secs(config.refresh_interval_secs),
    ));
    tokio::spawn(review_loop(
        pipeline.engines.clone(),
        Arc::clone(&pipeline.dispatcher),
        Duration::from_secs(config.review_interval_secs),
    ));
    tokio::spawn(housekeeping_loop(
        pipeline.engines.clone(),
        Duration::from_secs(config.housekeeping_interval_secs),
        config.history_retention_days,
    ));

    println!("  Press Ctrl+C to stop.\n");

    while let Some(event) = rx.recv().await {
        pipeline.process(&event);
    }

    Ok(())
}
