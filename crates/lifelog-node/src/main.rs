mod host;

use anyhow::{Context, Result};
use clap::Parser;
use host::{DiskUsage, FsStateStore, HostNet, ReqwestHttp, SimCamera, SimMicrophone, SystemClock};
use lifelog_core::config::NodeConfig;
use lifelog_engine::scheduler::{Node, NodeContext, Platform};
use lifelog_engine::store::ArtifactStore;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const LOOP_SLEEP_MS: u64 = 5;
const SIM_MIC_AMPLITUDE: i32 = 200;

#[derive(Parser, Debug)]
#[command(name = "lifelog-node", about = "Camera + microphone sensor node pipeline")]
struct Args {
    /// Storage root (the flash mount point)
    #[arg(long, default_value = "")]
    root: String,
    /// Ingest API base URL
    #[arg(long, default_value = "")]
    api_base: String,
    /// Device token issued at activation
    #[arg(long, default_value = "")]
    device_token: String,
    /// Accept untrusted TLS certificates on the upload target (dev only)
    #[arg(long, default_value_t = false)]
    insecure_tls: bool,
    /// Photo capture interval in milliseconds
    #[arg(long, default_value_t = 30_000)]
    capture_interval_ms: u64,
    #[arg(long, default_value_t = false)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let root = PathBuf::from(resolve(&args.root, "LIFELOG_ROOT", "./lifelog-data"));
    let api_base = resolve(&args.api_base, "LIFELOG_API_BASE", "http://127.0.0.1:8000");
    let device_token = resolve(&args.device_token, "LIFELOG_DEVICE_TOKEN", "");

    let mut cfg = NodeConfig::default();
    cfg.capture.interval_ms = args.capture_interval_ms;
    cfg.upload.device_token = device_token;

    let store = match open_store(&root) {
        Ok(store) => Some(store),
        Err(err) => {
            // Storage stays disabled for the process lifetime; the rest of
            // the node keeps running.
            error!(event = "storage_unavailable", root = %root.display(), error = %err);
            None
        }
    };

    let http = ReqwestHttp::new(&api_base, args.insecure_tls, cfg.upload.chunk_bytes)
        .context("build http client")?;
    let platform = Platform {
        clock: Box::new(SystemClock::new()),
        camera: Box::new(SimCamera::default()),
        mic: Box::new(SimMicrophone::new(cfg.audio.frame_ms, SIM_MIC_AMPLITUDE)),
        http: Box::new(http),
        net: Box::new(HostNet),
        usage: Box::new(DiskUsage::new(&root)),
    };
    let ctx = NodeContext {
        camera_ok: true,
        audio_ok: true,
        ..NodeContext::default()
    };

    info!(event = "node_starting", root = %root.display(), api_base = %api_base);
    let mut node = Node::new(cfg, ctx, store, platform);
    node.boot();

    loop {
        node.run_cycle();
        std::thread::sleep(Duration::from_millis(LOOP_SLEEP_MS));
    }
}

fn open_store(root: &Path) -> Result<ArtifactStore> {
    let state = FsStateStore::open(root.join("state")).context("open state store")?;
    let store = ArtifactStore::open(root, Box::new(state)).context("open artifact store")?;
    Ok(store)
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn resolve(flag: &str, env_key: &str, fallback: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    if let Ok(value) = std::env::var(env_key) {
        if !value.trim().is_empty() {
            return value;
        }
    }
    fallback.to_string()
}
