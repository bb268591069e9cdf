//! Server binary: parses CLI flags, loads layered configuration, opens the
//! store and Raft log, wires up the batcher and consensus actor, and runs
//! the accept loop until a signal asks it to stop.

use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use log::{error, info};
use rand::Rng;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use kvraftd::error::Result;
use kvraftd::server::AppState;
use kvraftd::store::Store;
use kvraftd::{apply, batch, config, raft, server};

#[derive(Parser)]
#[command(name = "kvraftd", about = "Replicated key-value store with Raft consensus")]
struct Args {
    /// Port to listen on. Overrides the layered config if set.
    #[arg(long)]
    port: Option<u16>,
    /// Stable node identifier. A random friendly name is used if omitted.
    #[arg(long)]
    id: Option<String>,
    /// Comma-separated list of peer `host:port` addresses. Empty means a
    /// standalone, self-electing node.
    #[arg(long, default_value = "")]
    peers: String,
    /// Optional TOML config file layered under environment/CLI overrides.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    init_logging();
    let args = Args::parse();

    let node_id = args.id.clone().unwrap_or_else(random_node_id);
    let peers: Vec<String> =
        args.peers.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect();

    match run_node(args, node_id, peers) {
        Ok(()) => 0,
        Err(err) => {
            error!("fatal startup error: {err}");
            1
        }
    }
}

fn run_node(args: Args, node_id: String, peers: Vec<String>) -> Result<()> {
    config::validate_peers(&peers)?;
    let settings = config::load(args.config.as_deref())?;
    let port = args.port.unwrap_or(settings.port);

    let store_path = config::node_scoped_path(&settings.store_file, &node_id);
    let raft_log_path = store_path.with_extension("raftlog");
    info!("[{node_id}] opening store {} and raft log {}", store_path.display(), raft_log_path.display());

    let store = Arc::new(Store::open(&store_path)?);
    let log = raft::log::Log::open(&raft_log_path)?;

    let self_address = format!("127.0.0.1:{port}");
    let raft_config = raft::Config::defaults(node_id.clone(), peers, self_address.clone());

    let (batcher, batcher_join) = batch::spawn(store.clone());
    let apply_fn = apply::make_apply_fn(store.clone(), batcher.clone());
    let (raft_handle, raft_join) = raft::spawn(raft_config, log, apply_fn);

    let listener = TcpListener::bind(("0.0.0.0", port))?;
    let shutdown = Arc::new(AtomicBool::new(false));
    spawn_signal_watcher(shutdown.clone(), port);

    let state = Arc::new(AppState { store: store.clone(), raft: raft_handle.clone() });
    info!("[{node_id}] listening on {self_address}");
    server::serve(listener, state, shutdown);

    info!("[{node_id}] shutting down");
    raft_handle.shutdown();
    batcher.shutdown();
    let _ = raft_join.join();
    let _ = batcher_join.join();
    info!("[{node_id}] shutdown complete");
    Ok(())
}

fn spawn_signal_watcher(shutdown: Arc<AtomicBool>, port: u16) {
    let Ok(mut signals) = Signals::new([SIGINT, SIGTERM]) else {
        error!("failed to install signal handler; shutdown will require a forced kill");
        return;
    };
    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            shutdown.store(true, Ordering::SeqCst);
            // Wake the blocking accept loop by connecting to ourselves once.
            let _ = TcpStream::connect(("127.0.0.1", port));
        }
    });
}

/// A friendly, human-readable default node id. Not cryptographically random;
/// collisions just mean two nodes picked the same scratch file name, which
/// surfaces immediately as a file lock failure on startup.
fn random_node_id() -> String {
    const ADJECTIVES: &[&str] =
        &["amber", "coral", "cedar", "ember", "lucid", "onyx", "quartz", "raven", "swift", "violet"];
    const NOUNS: &[&str] =
        &["basil", "cobalt", "delta", "fable", "grove", "ivory", "lumen", "maple", "marsh", "nomad"];
    let mut rng = rand::rng();
    let adjective = ADJECTIVES[rng.random_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.random_range(0..NOUNS.len())];
    format!("{adjective}-{noun}")
}

fn init_logging() {
    use simplelog::{ColorChoice, Config as LogConfig, LevelFilter, TermLogger, TerminalMode};
    let _ = TermLogger::init(LevelFilter::Info, LogConfig::default(), TerminalMode::Mixed, ColorChoice::Auto);
}
