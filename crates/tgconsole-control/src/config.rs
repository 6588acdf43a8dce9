use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
};

use anyhow::Context;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_DATA_DIR: &str = "/app/data";
const DEFAULT_SCRAPE_TIMEOUT_SECS: u64 = 900;

#[derive(Debug, Clone)]
pub struct ControlConfig {
    pub listen_addr: SocketAddr,
    pub jwt_secret: Vec<u8>,
    pub allowed_origins: Vec<String>,
    pub python: PathBuf,
    /// Working directory of the workers; passed to auto-chat as `--root-dir`.
    pub root_dir: PathBuf,
    pub scripts_dir: PathBuf,
    /// Holds `sessions/` and `scraped_data/`.
    pub data_dir: PathBuf,
    /// Forwarded to the scrape worker as `--timeout`.
    pub scrape_timeout_secs: u64,
}

impl ControlConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let root_dir = std::env::current_dir().context("resolve working directory")?;

        let listen_addr = std::env::var("TGC_LISTEN_ADDR")
            .unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string());
        let listen_addr: SocketAddr = listen_addr
            .trim()
            .parse()
            .with_context(|| format!("invalid TGC_LISTEN_ADDR: {listen_addr}"))?;

        let jwt_secret = match std::env::var("TGC_JWT_SECRET") {
            Ok(v) if !v.trim().is_empty() => v.into_bytes(),
            _ => {
                tracing::warn!("TGC_JWT_SECRET not set; using insecure development secret");
                b"dev-insecure-change-me".to_vec()
            }
        };

        let allowed_origins = parse_origins(
            &std::env::var("TGC_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string()),
        );

        let python = std::env::var_os("TGC_PYTHON")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("python3"));
        let scripts_dir = std::env::var_os("TGC_SCRIPTS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| root_dir.join("scripts"));
        let data_dir = resolve_data_dir(std::env::var_os("TGC_DATA_DIR").map(PathBuf::from), &root_dir);

        let scrape_timeout_secs = std::env::var("TGC_SCRAPE_MAX_RUNTIME_MS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(|ms| (ms / 1000).max(1))
            .unwrap_or(DEFAULT_SCRAPE_TIMEOUT_SECS);

        Ok(Self {
            listen_addr,
            jwt_secret,
            allowed_origins,
            python,
            root_dir,
            scripts_dir,
            data_dir,
            scrape_timeout_secs,
        })
    }

    /// Local configuration rooted at `root`: scripts under `root/scripts`, data under `root`.
    pub fn local(root: &Path, jwt_secret: &[u8]) -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            jwt_secret: jwt_secret.to_vec(),
            allowed_origins: Vec::new(),
            python: PathBuf::from("python3"),
            root_dir: root.to_path_buf(),
            scripts_dir: root.join("scripts"),
            data_dir: root.to_path_buf(),
            scrape_timeout_secs: DEFAULT_SCRAPE_TIMEOUT_SECS,
        }
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

// Explicit setting wins; otherwise the container volume if mounted, else the working directory.
fn resolve_data_dir(explicit: Option<PathBuf>, root_dir: &Path) -> PathBuf {
    if let Some(dir) = explicit {
        return dir;
    }
    let default = PathBuf::from(DEFAULT_DATA_DIR);
    if default.is_dir() {
        default
    } else {
        root_dir.to_path_buf()
    }
}
