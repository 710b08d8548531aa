//! Network services
//!
//! NMEA sentences are streamed to every client of the NMEA port; the vessel
//! table is served as JSON over HTTP.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::vessels::VesselStore;

pub const BROADCAST_CAPACITY: usize = 1024;

type NetResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Run the NMEA and HTTP servers until either fails.
pub async fn run_servers(
    nmea_port: u16,
    http_port: u16,
    nmea_tx: broadcast::Sender<String>,
    store: Arc<RwLock<VesselStore>>,
) -> NetResult {
    let nmea_handle = tokio::spawn(async move {
        if let Err(e) = run_nmea_server(nmea_port, nmea_tx).await {
            error!("NMEA server error: {}", e);
        }
    });

    let http_handle = tokio::spawn(async move {
        if let Err(e) = run_http_server(http_port, store).await {
            error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = nmea_handle => {}
        _ = http_handle => {}
    }

    Ok(())
}

async fn run_nmea_server(port: u16, tx: broadcast::Sender<String>) -> NetResult {
    let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("NMEA server listening on port {}", port);
    serve_nmea(listener, tx).await
}

async fn serve_nmea(listener: TcpListener, tx: broadcast::Sender<String>) -> NetResult {
    loop {
        let (socket, addr) = listener.accept().await?;
        debug!("NMEA client connected: {}", addr);
        let mut rx = tx.subscribe();

        tokio::spawn(async move {
            let mut socket = socket;
            loop {
                match rx.recv().await {
                    Ok(sentence) => {
                        // NMEA 0183 lines end in CR LF
                        let line = format!("{}\r\n", sentence);
                        if socket.write_all(line.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("NMEA client {} lagged, skipped {} sentences", addr, n);
                        continue;
                    }
                    Err(_) => break,
                }
            }
            debug!("NMEA client disconnected: {}", addr);
        });
    }
}

async fn run_http_server(port: u16, store: Arc<RwLock<VesselStore>>) -> NetResult {
    let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("HTTP server listening on port {}", port);
    serve_http(listener, store).await
}

async fn serve_http(listener: TcpListener, store: Arc<RwLock<VesselStore>>) -> NetResult {
    loop {
        let (socket, addr) = listener.accept().await?;
        debug!("HTTP client connected: {}", addr);

        let store = Arc::clone(&store);
        tokio::spawn(async move {
            if let Err(e) = handle_http_connection(socket, store).await {
                debug!("HTTP error: {}", e);
            }
        });
    }
}

/// Answer requests on one connection until the client or the protocol
/// version asks to close it.
async fn handle_http_connection(mut socket: TcpStream, store: Arc<RwLock<VesselStore>>) -> NetResult {
    let mut buffer = vec![0u8; 8192];
    loop {
        let n = socket.read(&mut buffer).await?;
        if n == 0 {
            return Ok(());
        }

        let request = String::from_utf8_lossy(&buffer[..n]);
        let first_line = request.lines().next().unwrap_or("");
        let parts: Vec<&str> = first_line.split_whitespace().collect();
        if parts.len() < 2 {
            return Ok(());
        }

        let http11 = first_line.contains("HTTP/1.1");
        let response = http_response(parts[1], http11, &request, &store);
        socket.write_all(response.as_bytes()).await?;
        if !keep_alive(http11, &request) {
            return Ok(());
        }
    }
}

fn keep_alive(http11: bool, request: &str) -> bool {
    let lower = request.to_lowercase();
    if http11 {
        !lower.contains("connection: close")
    } else {
        lower.contains("connection: keep-alive")
    }
}

/// Full response text for a request path.
fn http_response(
    url: &str,
    http11: bool,
    request: &str,
    store: &RwLock<VesselStore>,
) -> String {
    let (status, content_type, content) = if url.starts_with("/data.json") {
        ("200 OK", "application/json;charset=utf-8", store.read().to_json())
    } else {
        (
            "404 Not Found",
            "text/plain;charset=utf-8",
            "Not found; vessel data is at /data.json\n".to_string(),
        )
    };

    format!(
        "HTTP/1.1 {}\r\n\
         Server: ais-modem\r\n\
         Content-Type: {}\r\n\
         Connection: {}\r\n\
         Content-Length: {}\r\n\
         Access-Control-Allow-Origin: *\r\n\
         \r\n\
         {}",
        status,
        content_type,
        if keep_alive(http11, request) { "keep-alive" } else { "close" },
        content.len(),
        content
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[test]
    fn test_http_routes() {
        let store = RwLock::new(VesselStore::new(60));
        let ok = http_response("/data.json", true, "GET /data.json HTTP/1.1\r\n", &store);
        assert!(ok.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(ok.contains("Connection: keep-alive"));
        assert!(ok.ends_with("\r\n\r\n[]"));

        let missing = http_response("/", false, "GET / HTTP/1.0\r\n", &store);
        assert!(missing.starts_with("HTTP/1.1 404 Not Found"));
        assert!(missing.contains("Connection: close"));
    }

    #[tokio::test]
    async fn test_http_keep_alive_serves_several_requests() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let store = Arc::new(RwLock::new(VesselStore::new(60)));
        let server = tokio::spawn(serve_http(listener, store));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET /data.json HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut first = Vec::new();
        let mut buf = [0u8; 1024];
        while !first.ends_with(b"\r\n\r\n[]") {
            let n = client.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed after the first request");
            first.extend_from_slice(&buf[..n]);
        }
        assert!(String::from_utf8_lossy(&first).contains("Connection: keep-alive"));

        // same socket, and this time the client asks to close
        client
            .write_all(b"GET /data.json HTTP/1.1\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut second = Vec::new();
        client.read_to_end(&mut second).await.unwrap();
        let second = String::from_utf8_lossy(&second);
        assert!(second.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(second.contains("Connection: close"));
        server.abort();
    }

    #[test]
    fn test_keep_alive_rules() {
        assert!(keep_alive(true, "GET / HTTP/1.1\r\n"));
        assert!(!keep_alive(true, "GET / HTTP/1.1\r\nConnection: Close\r\n"));
        assert!(!keep_alive(false, "GET / HTTP/1.0\r\n"));
        assert!(keep_alive(false, "GET / HTTP/1.0\r\nConnection: keep-alive\r\n"));
    }

    #[tokio::test]
    async fn test_nmea_clients_receive_sentences() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let server = tokio::spawn(serve_nmea(listener, tx.clone()));

        let client = TcpStream::connect(addr).await.unwrap();
        let mut lines = BufReader::new(client).lines();
        // wait until the server has subscribed this client
        while tx.receiver_count() == 0 {
            tokio::task::yield_now().await;
        }

        tx.send("!AIVDM,1,1,,A,15MvlfP000G?n@@K>OW`4?vN0<0=,0*5A".to_string())
            .unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        assert_eq!(line.trim_end(), "!AIVDM,1,1,,A,15MvlfP000G?n@@K>OW`4?vN0<0=,0*5A");
        server.abort();
    }
}
