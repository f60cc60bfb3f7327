//! fgp-power-toggle daemon entry point.
//!
//! Daemonization happens before the service builds its Tokio runtime, so the
//! fork runs in a single-threaded process.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use daemonize::Daemonize;
use fgp_daemon::FgpServer;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use power_toggle::config::{resolve_path, Config};
use power_toggle::service::PowerToggleService;

const SERVICE_DIR: &str = ".fgp/services/power-toggle";

#[derive(Parser, Debug)]
#[command(name = "fgp-power-toggle")]
#[command(version, about = "Cache tagged AWS environments and power-toggle them safely")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Socket path (defaults to ~/.fgp/services/power-toggle/daemon.sock)
        #[arg(long)]
        socket: Option<String>,

        /// Run in foreground (don't daemonize)
        #[arg(long)]
        foreground: bool,

        /// Config file (defaults to ~/.fgp/services/power-toggle/config.json)
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Stop a running daemon
    Stop {
        #[arg(long)]
        socket: Option<String>,
    },
    /// Show whether the daemon is running
    Status {
        #[arg(long)]
        socket: Option<String>,
    },
}

fn service_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(SERVICE_DIR))
}

fn socket_path(socket: Option<&str>) -> Result<PathBuf> {
    match socket {
        Some(path) => Ok(resolve_path(path)),
        None => Ok(service_dir()?.join("daemon.sock")),
    }
}

fn pid_path(socket: &Path) -> PathBuf {
    socket.with_extension("pid")
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_lowercase()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn read_pid(path: &Path) -> Option<libc::pid_t> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn is_running(pid: libc::pid_t) -> bool {
    // Signal 0 only checks that the process exists.
    unsafe { libc::kill(pid, 0) == 0 }
}

fn start(socket: Option<String>, foreground: bool, config_path: Option<String>) -> Result<()> {
    let (config, source) =
        Config::load(config_path.as_deref()).context("Failed to load configuration")?;
    let socket = socket_path(socket.as_deref())?;
    let pid_file = pid_path(&socket);

    if let Some(pid) = read_pid(&pid_file) {
        if is_running(pid) {
            anyhow::bail!("Daemon is already running (pid {})", pid);
        }
    }

    if let Some(parent) = socket.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    if !foreground {
        let dir = socket
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir);
        let log = File::create(dir.join("daemon.log")).context("Failed to create log file")?;
        let err_log = log.try_clone().context("Failed to open log file")?;
        Daemonize::new()
            .pid_file(&pid_file)
            .working_directory(&dir)
            .stdout(log)
            .stderr(err_log)
            .start()
            .context("Failed to daemonize")?;
    }

    init_logging(&config);
    tracing::info!(source = %source, "configuration loaded");
    for warning in config.warnings() {
        tracing::warn!("{}", warning);
    }
    tracing::debug!(config = %config.summary(), "effective configuration");
    tracing::info!(socket = %socket.display(), "starting power-toggle daemon");

    let service = PowerToggleService::new(config).context("Failed to create service")?;
    let socket_str = socket.to_string_lossy().into_owned();
    let server = FgpServer::new(service, &socket_str)
        .context("Failed to create FGP server")?;
    server.serve().context("FGP server exited with an error")?;
    Ok(())
}

fn stop(socket: Option<String>) -> Result<()> {
    let socket = socket_path(socket.as_deref())?;
    let pid_file = pid_path(&socket);

    let pid = read_pid(&pid_file)
        .with_context(|| format!("No PID file at {}", pid_file.display()))?;

    if is_running(pid) {
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc != 0 {
            anyhow::bail!(
                "Failed to signal pid {}: {}",
                pid,
                std::io::Error::last_os_error()
            );
        }
        println!("Stopped power-toggle daemon (pid {})", pid);
    } else {
        println!("Daemon was not running (stale pid {})", pid);
    }

    remove_stale(&pid_file);
    remove_stale(&socket);
    Ok(())
}

/// Remove a leftover daemon file. A file that is already gone is fine.
fn remove_stale(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove daemon file");
            eprintln!("Warning: could not remove {}: {}", path.display(), e);
        }
    }
}

fn status(socket: Option<String>) -> Result<()> {
    let socket = socket_path(socket.as_deref())?;
    match read_pid(&pid_path(&socket)) {
        Some(pid) if is_running(pid) => {
            println!("running (pid {}, socket {})", pid, socket.display());
        }
        Some(pid) => println!("not running (stale pid {})", pid),
        None if socket.exists() => println!("running in foreground (socket {})", socket.display()),
        None => println!("not running"),
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Start {
            socket,
            foreground,
            config,
        } => start(socket, foreground, config),
        Command::Stop { socket } => stop(socket),
        Command::Status { socket } => status(socket),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_stale_tolerates_missing_files() {
        let path = std::env::temp_dir().join(format!("power-toggle-{}.pid", std::process::id()));
        std::fs::write(&path, "1").unwrap();
        remove_stale(&path);
        assert!(!path.exists());
        // second removal hits NotFound and is silent
        remove_stale(&path);
    }

    #[test]
    fn test_pid_file_sits_next_to_socket() {
        let socket = PathBuf::from("/tmp/power-toggle/daemon.sock");
        assert_eq!(pid_path(&socket), PathBuf::from("/tmp/power-toggle/daemon.pid"));
    }
}
