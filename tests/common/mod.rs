//! Common test utilities for integration tests

use std::collections::HashMap;
use std::sync::Arc;

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use tributary::service::{EmptyFollowerDirectory, HttpTransport};
use tributary::{config, Engine};

/// A canned remote server: serves fixed responses per path.
///
/// Stands in for the remote actor/feed/hub during connect cycles, so
/// tests run without real network access.
pub struct StubRemote {
    addr: std::net::SocketAddr,
    _task: tokio::task::JoinHandle<()>,
}

/// One canned response
#[derive(Clone)]
pub struct StubResponse {
    pub content_type: String,
    pub body: String,
}

impl StubRemote {
    /// Start serving the given (path, response) routes.
    pub async fn serve(routes: Vec<(String, StubResponse)>) -> Self {
        Self::serve_with(|_| routes).await
    }

    /// Start serving routes built against the server's own base URL.
    ///
    /// Needed for ActivityPub documents, which carry absolute
    /// references (outbox, next page, attributedTo) back to the server.
    pub async fn serve_with<F>(build: F) -> Self
    where
        F: FnOnce(&str) -> Vec<(String, StubResponse)>,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let routes = build(&format!("http://{}", addr));
        let routes: Arc<HashMap<String, StubResponse>> = Arc::new(routes.into_iter().collect());

        let task = tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let routes = routes.clone();

                tokio::spawn(async move {
                    let Some(path) = read_request(&mut socket).await else {
                        return;
                    };

                    let reply = match routes.get(&path) {
                        Some(response) => format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            response.content_type,
                            response.body.len(),
                            response.body
                        ),
                        None => {
                            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                                .to_string()
                        }
                    };

                    let _ = socket.write_all(reply.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self { addr, _task: task }
    }

    /// Absolute URL for a served path
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Read one HTTP request and return its path (query string included).
async fn read_request(socket: &mut tokio::net::TcpStream) -> Option<String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];

    while !buffer.windows(4).any(|window| window == b"\r\n\r\n") {
        let read = socket.read(&mut chunk).await.ok()?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
        if buffer.len() > 64 * 1024 {
            return None;
        }
    }

    let head = String::from_utf8_lossy(&buffer);
    let request_line = head.lines().next()?;
    let path = request_line.split_whitespace().nth(1)?;
    Some(path.to_string())
}

/// Engine over a temporary database, wired with the unsigned transport.
pub struct TestEngine {
    pub engine: Engine,
    pub _temp_dir: TempDir,
}

impl TestEngine {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();

        let config = config::AppConfig {
            server: config::ServerConfig {
                domain: "local.example".to_string(),
                protocol: "https".to_string(),
            },
            database: config::DatabaseConfig {
                path: temp_dir.path().join("test.db"),
            },
            fetch: config::FetchConfig {
                timeout_seconds: 5,
                max_body_bytes: 1024 * 1024,
                user_agent: "Tributary/0.1.0 (test)".to_string(),
            },
            ingest: config::IngestConfig {
                unread_backlog: 6,
                purge_days: 14,
            },
            websub: config::WebSubConfig {
                callback_base: String::new(),
                lease_seconds: 604_800,
            },
            scheduler: config::SchedulerConfig {
                poll_interval_seconds: 900,
            },
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };

        let http = reqwest::Client::new();
        let engine = Engine::new(
            config,
            Arc::new(HttpTransport::new(http)),
            Arc::new(EmptyFollowerDirectory),
        )
        .await
        .unwrap();

        Self {
            engine,
            _temp_dir: temp_dir,
        }
    }
}
