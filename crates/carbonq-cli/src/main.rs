//! # carbonq Entry Point
//!
//! Graphite-compatible metrics query API. Sits in front of a zipper, parses
//! render targets, fans fetches out under a concurrency cap, evaluates the
//! expressions and caches the encoded responses.
//!
//! ## Usage
//!
//! ```bash
//! # In-memory caches, 20 concurrent renders
//! carbonq -z http://zipper:8080 -p 8081
//!
//! # Memcached-backed caches
//! carbonq -z http://zipper:8080 --cache memcache --mc mc1:11211,mc2:11211
//!
//! # Push counters to graphite, log to stdout
//! carbonq -z http://zipper:8080 --graphite graphite:2003 --stdout
//! ```
//!
//! ## Environment
//!
//! - `PORT` overrides `-p`
//! - `GRAPHITEHOST` / `GRAPHITEPORT` override `--graphite`
//! - `RUST_LOG` overrides the default `info` filter

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use argh::FromArgs;

use carbonq_common::cache::{BytesCache, ExpiringCache, McCache, SWEEP_INTERVAL};
use carbonq_common::limiter::Limiter;
use carbonq_common::timeparse::{parse_tz_flag, TimeParser};
use carbonq_metrics::{ApiMetrics, GraphitePusher};
use carbonq_server::{AppState, HttpServer};
use carbonq_zipper::ZipperClient;

/// carbonq - Graphite-compatible metrics query API
#[derive(FromArgs)]
struct Args {
    /// zipper base url (required), e.g. http://zipper:8080
    #[argh(option, short = 'z', default = "String::new()")]
    zipper: String,

    /// port to listen on
    #[argh(option, short = 'p', default = "8080")]
    port: u16,

    /// concurrent render fetch limit
    #[argh(option, short = 'l', default = "20")]
    concurrency: usize,

    /// cache type: mem, memcache or null
    #[argh(option, default = "\"mem\".into()")]
    cache: String,

    /// comma separated memcached server list
    #[argh(option, default = "String::new()")]
    mc: String,

    /// in-memory cache size in MB (0 is unlimited)
    #[argh(option, default = "0")]
    memsize: u64,

    /// number of worker threads (0 is the runtime default)
    #[argh(option, default = "0")]
    cpus: usize,

    /// timezone as name,offsetSeconds for dates with no timezone
    #[argh(option, default = "String::new()")]
    tz: String,

    /// graphite destination host[:port] for counter export
    #[argh(option, default = "String::new()")]
    graphite: String,

    /// logging directory
    #[argh(option, default = "\"/var/log/carbonq/\".into()")]
    logdir: String,

    /// log to stdout only
    #[argh(switch)]
    stdout: bool,

    /// reverse-proxy target for unrecognized paths
    #[argh(option, default = "\"http://127.0.0.1:8080/\".into()")]
    frontend: String,
}

fn main() -> Result<()> {
    let args: Args = argh::from_env();

    init_logging(&args)?;
    tracing::info!("starting carbonq {}", env!("CARGO_PKG_VERSION"));

    let port = match std::env::var("PORT") {
        Ok(p) => p.parse().context("unable to parse PORT")?,
        Err(_) => args.port,
    };

    // The runtime is built by hand so --cpus can size the worker pool.
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if args.cpus > 0 {
        builder.worker_threads(args.cpus);
    }
    let runtime = builder.build().context("unable to build runtime")?;
    runtime.block_on(run(args, port))
}

async fn run(args: Args, port: u16) -> Result<()> {
    if args.zipper.is_empty() {
        bail!("no zipper provided");
    }
    args.zipper
        .parse::<hyper::Uri>()
        .with_context(|| format!("unable to parse zipper url: {}", args.zipper))?;
    tracing::info!("using zipper {}", args.zipper);

    let metrics = Arc::new(ApiMetrics::new());
    let zipper = ZipperClient::new(args.zipper.clone(), args.concurrency);

    let (query_cache, find_cache) = build_caches(&args, &metrics)?;

    let time_parser = if args.tz.is_empty() {
        TimeParser::default()
    } else {
        let tz = parse_tz_flag(&args.tz).with_context(|| format!("bad tz flag: {}", args.tz))?;
        TimeParser::new(Some(tz))
    };

    if let Some(host) = graphite_host(&args.graphite) {
        tracing::info!("using graphite host {host}");
        GraphitePusher::new(host, metrics.clone()).spawn();
    }

    let mut state = AppState::new(zipper);
    state.query_cache = query_cache;
    state.find_cache = find_cache;
    state.limiter = Limiter::new(args.concurrency);
    state.metrics = metrics;
    state.time_parser = time_parser;
    state.frontend = args.frontend;

    let addr: SocketAddr = format!("0.0.0.0:{port}")
        .parse()
        .context("invalid listen address")?;
    HttpServer::new(state).run(addr).await?;
    Ok(())
}

fn build_caches(args: &Args, metrics: &Arc<ApiMetrics>) -> Result<(BytesCache, BytesCache)> {
    match args.cache.as_str() {
        "memcache" => {
            if args.mc.is_empty() {
                bail!("memcache cache requested but no memcache servers provided");
            }
            let servers: Vec<String> = args.mc.split(',').map(str::to_owned).collect();
            tracing::info!("using memcache servers: {servers:?}");
            let query = McCache::new(servers.clone(), metrics.memcache_timeouts.clone());
            let find = McCache::new(servers, metrics.memcache_timeouts.clone());
            Ok((BytesCache::Memcached(query), BytesCache::Memcached(find)))
        }
        "mem" => {
            let query = ExpiringCache::new(args.memsize * 1024 * 1024);
            query.spawn_sweeper(SWEEP_INTERVAL);
            let find = ExpiringCache::new(0);
            find.spawn_sweeper(SWEEP_INTERVAL);

            let size_handle = query.clone();
            metrics.register_gauge("cache_size", move || size_handle.size());
            let items_handle = query.clone();
            metrics.register_gauge("cache_items", move || items_handle.items());

            Ok((BytesCache::Mem(query), BytesCache::Mem(find)))
        }
        "null" => Ok((BytesCache::Null, BytesCache::Null)),
        other => bail!("unknown cache type: {other}"),
    }
}

/// Resolves the graphite destination: the environment pair wins over the
/// flag when both are set.
fn graphite_host(flag: &str) -> Option<String> {
    let envhost = format!(
        "{}:{}",
        std::env::var("GRAPHITEHOST").unwrap_or_default(),
        std::env::var("GRAPHITEPORT").unwrap_or_default()
    );
    if envhost != ":" {
        return Some(envhost);
    }
    if !flag.is_empty() {
        return Some(flag.to_owned());
    }
    None
}

fn init_logging(args: &Args) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if args.stdout {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
        return Ok(());
    }

    std::fs::create_dir_all(&args.logdir)
        .with_context(|| format!("unable to create log directory {}", args.logdir))?;
    let path = std::path::Path::new(&args.logdir).join("carbonq.log");
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("unable to open log file {}", path.display()))?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(file))
        .init();
    Ok(())
}

/// CLI parsing tests: each simulates an invocation and checks the decoded
/// arguments.
#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::from_args(&["carbonq"], argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["-z", "http://zipper:8080"]);
        assert_eq!(args.zipper, "http://zipper:8080");
        assert_eq!(args.port, 8080);
        assert_eq!(args.concurrency, 20);
        assert_eq!(args.cache, "mem");
        assert_eq!(args.memsize, 0);
        assert_eq!(args.cpus, 0);
        assert_eq!(args.logdir, "/var/log/carbonq/");
        assert!(!args.stdout);
        assert_eq!(args.frontend, "http://127.0.0.1:8080/");
    }

    #[test]
    fn test_short_flags() {
        let args = parse(&["-z", "http://z:1", "-p", "9090", "-l", "5"]);
        assert_eq!(args.port, 9090);
        assert_eq!(args.concurrency, 5);
    }

    #[test]
    fn test_memcache_flags() {
        let args = parse(&[
            "-z", "http://z:1",
            "--cache", "memcache",
            "--mc", "mc1:11211,mc2:11211",
        ]);
        assert_eq!(args.cache, "memcache");
        assert_eq!(args.mc, "mc1:11211,mc2:11211");
    }

    #[test]
    fn test_tz_and_graphite() {
        let args = parse(&[
            "-z", "http://z:1",
            "--tz", "EST,-18000",
            "--graphite", "graphite:2003",
            "--stdout",
        ]);
        assert_eq!(args.tz, "EST,-18000");
        assert_eq!(args.graphite, "graphite:2003");
        assert!(args.stdout);
    }

    #[test]
    fn test_build_caches_null() {
        let args = parse(&["-z", "http://z:1", "--cache", "null"]);
        let metrics = Arc::new(ApiMetrics::new());
        let (query, find) = build_caches(&args, &metrics).unwrap();
        assert!(matches!(query, BytesCache::Null));
        assert!(matches!(find, BytesCache::Null));
    }

    #[test]
    fn test_build_caches_memcache_requires_servers() {
        let args = parse(&["-z", "http://z:1", "--cache", "memcache"]);
        let metrics = Arc::new(ApiMetrics::new());
        assert!(build_caches(&args, &metrics).is_err());
    }

    #[test]
    fn test_build_caches_unknown_type() {
        let args = parse(&["-z", "http://z:1", "--cache", "redis"]);
        let metrics = Arc::new(ApiMetrics::new());
        assert!(build_caches(&args, &metrics).is_err());
    }
}
