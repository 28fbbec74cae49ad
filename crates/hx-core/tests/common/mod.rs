// Each test binary compiles this module independently and uses a different
// subset of helpers, so unused-function warnings are expected.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use hx_core::models::DaemonConfig;
use hx_core::services::deploy::Deployer;
use hx_core::services::ports::PortAllocator;
use hx_core::services::registry::Registry;
use hx_core::services::{control, shutdown};
use hx_core::HaxigonError;

pub const SLEEPER: &str = "#!/bin/sh\nexec sleep 30";

/// A running control server over temporary repo and bin roots.
pub struct Harness {
    _root: TempDir,
    pub repo_root: PathBuf,
    pub bin_root: PathBuf,
    pub registry: Arc<Registry>,
    pub addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<Vec<(String, HaxigonError)>>>,
}

impl Harness {
    pub async fn start(grace_period: Duration) -> Self {
        let root = tempfile::tempdir().unwrap();
        let repo_root = root.path().join("repos");
        let bin_root = root.path().join("bin");
        std::fs::create_dir_all(&repo_root).unwrap();
        std::fs::create_dir_all(&bin_root).unwrap();

        let config = DaemonConfig {
            listen: "127.0.0.1:0".into(),
            repo_root: repo_root.clone(),
            bin_root: bin_root.clone(),
            port_base: 5000,
            grace_period,
            fetch_command: vec!["cp".into(), "-R".into()],
        };
        let registry = Arc::new(Registry::new(
            PortAllocator::new(config.port_base),
            config.grace_period,
        ));
        let deployer = Arc::new(Deployer::new(&config, registry.clone()));

        let listener = TcpListener::bind(config.listen.as_str()).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server_registry = registry.clone();
        let server = tokio::spawn(async move {
            let tracker = TaskTracker::new();
            let cancel = CancellationToken::new();
            shutdown::run_until(
                control::serve(listener, deployer, tracker.clone(), cancel.clone()),
                async {
                    let _ = shutdown_rx.await;
                },
                &server_registry,
                &tracker,
                &cancel,
            )
            .await
        });

        Self {
            _root: root,
            repo_root,
            bin_root,
            registry,
            addr,
            shutdown_tx: Some(shutdown_tx),
            server: Some(server),
        }
    }

    /// Put an application with `script` as its entry point into the repo root.
    pub fn install_app(&self, name: &str, script: &str) {
        install_app(&self.repo_root.join(name), script);
    }

    pub async fn connect(&self) -> Client {
        let stream = TcpStream::connect(self.addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        Client {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    /// Trigger the shutdown path and wait for the drain to finish.
    pub async fn shutdown(&mut self) -> Vec<(String, HaxigonError)> {
        self.shutdown_tx.take().unwrap().send(()).unwrap();
        self.server.take().unwrap().await.unwrap()
    }
}

pub struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    pub async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    pub async fn reply(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(30), self.lines.next_line())
            .await
            .expect("timed out waiting for a reply")
            .unwrap()
            .expect("connection closed")
    }

    /// True once the daemon has closed its end of the connection.
    pub async fn closed(&mut self) -> bool {
        matches!(
            tokio::time::timeout(Duration::from_secs(5), self.lines.next_line()).await,
            Ok(Ok(None))
        )
    }

    /// Send one application name and wait for the single reply line.
    pub async fn deploy(&mut self, name: &str) -> String {
        self.send(name).await;
        self.reply().await
    }
}

/// Installs the entry point through a subprocess so the test process never
/// holds a writable handle on a file that is later executed.
pub fn install_app(dir: &Path, script: &str) {
    std::fs::create_dir_all(dir).unwrap();
    let status = std::process::Command::new("/bin/sh")
        .arg("-c")
        .arg(r#"printf '%s\n' "$1" > "$2/main" && chmod 755 "$2/main""#)
        .arg("sh")
        .arg(script)
        .arg(dir)
        .status()
        .unwrap();
    assert!(status.success());
}

/// The port number at the end of a "Deployed <name> on port <n>" reply.
pub fn deployed_port(reply: &str) -> u16 {
    assert!(reply.contains("Deployed"), "unexpected reply: {reply}");
    reply.rsplit(' ').next().unwrap().parse().unwrap()
}

pub fn process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}
