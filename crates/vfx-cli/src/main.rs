//! vfx - host CLI for the node-graph pull engine and its row/frame caches.
//!
//! Exercises [`vfx_node`] and [`vfx_cache`] end to end: `demo` pulls a small
//! graph through an in-process row cache, and the `cache-*` commands operate
//! on a persisted viewer (frame) cache directory.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{fmt, EnvFilter};

use vfx_cache::{ChannelSet, NodeCache, ViewerCache, ViewerCacheConfig};
use vfx_node::{ConstantFillOperator, GradeOperator, GraphNode, Node, VerticalBoxBlurOperator};

// =============================================================================
// Logging infrastructure
// =============================================================================

/// Global logger instance for file logging.
static LOGGER: Mutex<Option<Logger>> = Mutex::new(None);

/// File logger that writes messages to a log file.
struct Logger {
    file: File,
}

impl Logger {
    /// Creates a new logger writing to the specified path (append mode).
    fn new(path: &PathBuf) -> std::io::Result<Self> {
        let file = File::options().append(true).create(true).open(path)?;
        Ok(Self { file })
    }

    /// Writes a message to the log file.
    fn log(&mut self, msg: &str) {
        let _ = writeln!(self.file, "{msg}");
    }
}

/// Logs a message to stderr and optionally to the log file.
pub fn log(msg: &str) {
    eprintln!("{msg}");
    if let Ok(mut guard) = LOGGER.lock() {
        if let Some(ref mut logger) = *guard {
            logger.log(msg);
        }
    }
}

/// Returns the default log file path (next to the binary).
fn get_default_log_path() -> PathBuf {
    if let Ok(exe_path) = std::env::current_exe() {
        let mut log_path = exe_path;
        log_path.set_extension("log");
        log_path
    } else {
        PathBuf::from("vfx.log")
    }
}

/// Initialize tracing based on verbosity level.
fn init_tracing(verbose: u8, log_path: Option<&PathBuf>) {
    let filter = match verbose {
        0 => "warn",
        1 => "vfx=info",
        2 => "vfx=debug",
        _ => "vfx=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    if let Some(path) = log_path {
        let log_dir = path.parent().unwrap_or(Path::new("."));
        let log_filename = path.file_name().unwrap_or(std::ffi::OsStr::new("vfx.log"));
        let file_appender = tracing_appender::rolling::never(log_dir, log_filename);

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_timer(fmt::time::uptime())
            .with_ansi(false)
            .with_writer(file_appender)
            .init();
    } else if verbose > 0 {
        tracing_subscriber::fmt().with_env_filter(env_filter).with_target(true).with_timer(fmt::time::uptime()).init();
    }
}

#[derive(Parser)]
#[command(name = "vfx")]
#[command(author, version, about = "Node-graph pull engine and cache host")]
#[command(long_about = "
Drives a small node graph through the row cache, and inspects or manages a
persisted viewer (frame) cache directory.

Examples:
  vfx demo --width 64 --rows 8           # pull a toy graph, print cache stats
  vfx cache-info --root ./viewer-cache   # restore and report a viewer cache
  vfx cache-clear --root ./viewer-cache  # wipe a viewer cache directory
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Write log to file (-l default, -l path.log custom)
    #[arg(short = 'l', long = "log", global = true)]
    log: Option<Option<PathBuf>>,

    /// Number of threads (0 = auto)
    #[arg(short = 'j', long, global = true, default_value = "0")]
    threads: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull a toy graph (constant fill -> grade -> vertical box blur) through
    /// an in-process row cache and print the resulting pixel values.
    Demo(DemoArgs),

    /// Restore a viewer cache directory and print its current footprint.
    CacheInfo(CacheInfoArgs),

    /// Wipe a viewer cache directory.
    CacheClear(CacheClearArgs),
}

#[derive(Args)]
struct DemoArgs {
    /// Row width in pixels.
    #[arg(short, long, default_value = "64")]
    width: usize,

    /// Number of consecutive rows to pull.
    #[arg(short, long, default_value = "8")]
    rows: i32,

    /// Node cache byte capacity.
    #[arg(long, default_value = "1048576")]
    capacity: usize,
}

#[derive(Args)]
struct CacheInfoArgs {
    /// Root directory the cache lives under.
    #[arg(short, long)]
    root: PathBuf,

    /// Cache instance name.
    #[arg(short, long, default_value = "viewer")]
    name: String,

    /// Total byte budget.
    #[arg(long, default_value = "1073741824")]
    max_size: usize,

    /// Fraction of `max_size` reserved for the mapped sub-set.
    #[arg(long, default_value = "0.25")]
    in_memory_fraction: f64,
}

#[derive(Args)]
struct CacheClearArgs {
    /// Root directory the cache lives under.
    #[arg(short, long)]
    root: PathBuf,

    /// Cache instance name.
    #[arg(short, long, default_value = "viewer")]
    name: String,

    /// Total byte budget (only used to open the cache; irrelevant to clearing).
    #[arg(long, default_value = "1073741824")]
    max_size: usize,

    /// Fraction of `max_size` reserved for the mapped sub-set.
    #[arg(long, default_value = "0.25")]
    in_memory_fraction: f64,
}

fn run_demo(args: DemoArgs, verbose: u8) -> Result<()> {
    let cache = NodeCache::new(args.capacity);

    let source: Arc<dyn Node> = Arc::new(
        GraphNode::new(Box::new(ConstantFillOperator { channels: ChannelSet::rgba(), value: 0.2 }), vec![])
            .with_filename("demo-source"),
    );
    let graded: Arc<dyn Node> =
        Arc::new(GraphNode::new(Box::new(GradeOperator { scale: 2.0, offset: 0.05 }), vec![Arc::clone(&source)]));
    let blurred: Arc<dyn Node> =
        Arc::new(GraphNode::new(Box::new(VerticalBoxBlurOperator { radius: 1 }), vec![Arc::clone(&graded)]));

    for y in 0..args.rows {
        let row = blurred
            .produce_row(&cache, y, 0, args.width as i32, ChannelSet::rgba())
            .with_context(|| format!("pulling row {y}"))?;
        let red = row.with_channel(vfx_cache::Channel::Red, |buf| buf[0]).unwrap_or(0.0);
        if verbose > 0 {
            log(&format!("row {y}: red[0] = {red}"));
        }
    }

    let stats = cache.stats();
    println!(
        "pulled {} rows; cache hits={} misses={} evictions={} peak_size={}",
        args.rows, stats.hits, stats.misses, stats.evictions, stats.peak_size
    );
    Ok(())
}

fn viewer_cache(root: PathBuf, name: String, max_size: usize, in_memory_fraction: f64) -> Result<ViewerCache> {
    let cache = ViewerCache::new(ViewerCacheConfig { cache_root: Some(root), name, max_size, in_memory_fraction })
        .context("opening viewer cache")?;
    Ok(cache)
}

fn run_cache_info(args: CacheInfoArgs) -> Result<()> {
    let cache = viewer_cache(args.root, args.name, args.max_size, args.in_memory_fraction)?;
    cache.restore().context("restoring viewer cache")?;
    let stats = cache.stats();
    println!(
        "mapped_size={} total_size={} hits={} misses={} evictions={} hit_rate={:.3}",
        cache.mapped_size(),
        cache.total_size(),
        stats.hits,
        stats.misses,
        stats.evictions,
        stats.hit_rate()
    );
    Ok(())
}

fn run_cache_clear(args: CacheClearArgs) -> Result<()> {
    let cache = viewer_cache(args.root, args.name, args.max_size, args.in_memory_fraction)?;
    cache.clear_all().context("clearing viewer cache")?;
    println!("viewer cache cleared");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_path = match &cli.log {
        Some(Some(path)) => Some(path.clone()),
        Some(None) => Some(get_default_log_path()),
        None => None,
    };

    init_tracing(cli.verbose, log_path.as_ref());

    if let Some(ref path) = log_path {
        if let Ok(logger) = Logger::new(path) {
            if let Ok(mut guard) = LOGGER.lock() {
                *guard = Some(logger);
            }
            if cli.verbose > 0 {
                log(&format!("Logging to: {}", path.display()));
            }
        }
    }

    if cli.threads > 0 {
        rayon::ThreadPoolBuilder::new().num_threads(cli.threads).build_global().context("Failed to configure thread pool")?;
    }

    match cli.command {
        Commands::Demo(args) => run_demo(args, cli.verbose),
        Commands::CacheInfo(args) => run_cache_info(args),
        Commands::CacheClear(args) => run_cache_clear(args),
    }
}
