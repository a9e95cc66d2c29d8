use std::path::{Path, PathBuf};

pub use stagehand_core::config::stagehand_root;

pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn run_dir(home: &Path) -> PathBuf {
    stagehand_root(home).join("run")
}

pub fn socket_path(home: &Path) -> PathBuf {
    stagehand_root(home).join(DAEMON_SOCKET)
}

