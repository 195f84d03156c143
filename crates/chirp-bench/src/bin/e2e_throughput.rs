//! End-to-end throughput benchmark for Chirp.
//!
//! Opens `N` event streams against a running server, then posts messages as
//! fast as the server accepts them and counts how many reach the streams.
//!
//! ```bash
//! PORT=8080 API_CODE=s3cret chirp &
//! CHIRP_ADDR=127.0.0.1:8080 API_CODE=s3cret e2e_throughput 16
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Barrier;

const DEFAULT_ADDR: &str = "127.0.0.1:8080";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;
const EVENT_MARKER: &[u8] = b"event: messageReceived\n";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let addr = std::env::var("CHIRP_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let api_code = std::env::var("API_CODE").unwrap_or_else(|_| "changeme".to_string());

    println!("Chirp end-to-end throughput benchmark");
    println!("  server: {}", addr);
    println!();

    run_broadcast_benchmark(num_clients, addr, api_code).await;
}

async fn run_broadcast_benchmark(num_clients: usize, addr: String, api_code: String) {
    println!("Broadcast benchmark: {} subscribers", num_clients);
    println!("  warmup: {}s, measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let received = Arc::new(AtomicU64::new(0));
    let posted = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();

    for client_id in 0..num_clients {
        let received = Arc::clone(&received);
        let barrier = Arc::clone(&barrier);
        let addr = addr.clone();

        handles.push(tokio::spawn(async move {
            if let Err(e) = run_subscriber(&addr, received, barrier).await {
                eprintln!("Subscriber {} error: {}", client_id, e);
            }
        }));
    }

    // Wait for all subscribers to connect
    barrier.wait().await;
    println!("All {} subscribers connected", num_clients);

    {
        let posted = Arc::clone(&posted);
        handles.push(tokio::spawn(async move {
            if let Err(e) = run_publisher(&addr, &api_code, posted).await {
                eprintln!("Publisher error: {}", e);
            }
        }));
    }

    println!("Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    received.store(0, Ordering::SeqCst);
    posted.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed().as_secs_f64();
    let total_received = received.load(Ordering::SeqCst);
    let total_posted = posted.load(Ordering::SeqCst);

    println!();
    println!("Results");
    println!("  subscribers:      {:>12}", num_clients);
    println!("  duration:         {:>12.2}s", elapsed);
    println!("  posts accepted:   {:>12}", total_posted);
    println!("  post rate:        {:>12.0} msg/s", total_posted as f64 / elapsed);
    println!("  events delivered: {:>12}", total_received);
    println!("  delivery rate:    {:>12.0} evt/s", total_received as f64 / elapsed);

    for handle in handles {
        handle.abort();
    }
}

async fn run_subscriber(
    addr: &str,
    received: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), BoxError> {
    let mut stream = TcpStream::connect(addr).await?;
    let request = format!(
        "GET /subscribe HTTP/1.1\r\nHost: {}\r\nAccept: text/event-stream\r\n\r\n",
        addr
    );
    stream.write_all(request.as_bytes()).await?;

    barrier.wait().await;

    // Frames may straddle reads, so keep the tail that could hold a partial
    // marker.
    let mut buf = vec![0u8; 64 * 1024];
    let mut carry: Vec<u8> = Vec::new();
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        carry.extend_from_slice(&buf[..n]);

        let count = carry
            .windows(EVENT_MARKER.len())
            .filter(|w| *w == EVENT_MARKER)
            .count();
        received.fetch_add(count as u64, Ordering::Relaxed);

        let keep = carry.len().min(EVENT_MARKER.len() - 1);
        carry.drain(..carry.len() - keep);
    }
}

async fn run_publisher(addr: &str, api_code: &str, posted: Arc<AtomicU64>) -> Result<(), BoxError> {
    let mut stream = TcpStream::connect(addr).await?;
    let body = serde_json::json!({
        "message": "x".repeat(64),
        "nick": "bench",
    })
    .to_string();
    let request = format!(
        "POST /sendMessage HTTP/1.1\r\nHost: {}\r\nAuthorization: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
        addr,
        api_code,
        body.len(),
        body
    );

    let mut buf = Vec::with_capacity(1024);
    loop {
        stream.write_all(request.as_bytes()).await?;
        let status = read_response(&mut stream, &mut buf).await?;
        if status != 200 {
            return Err(format!("server answered {}", status).into());
        }
        posted.fetch_add(1, Ordering::Relaxed);
    }
}

/// Read one `Content-Length` delimited response and return its status code.
async fn read_response(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Result<u16, BoxError> {
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(end) = find(buf, b"\r\n\r\n") {
            let head = std::str::from_utf8(&buf[..end])?;
            let status = head
                .split_whitespace()
                .nth(1)
                .and_then(|s| s.parse().ok())
                .ok_or("malformed status line")?;
            let length: usize = head
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse().ok())
                        .flatten()
                })
                .unwrap_or(0);

            let total = end + 4 + length;
            if buf.len() >= total {
                buf.drain(..total);
                return Ok(status);
            }
        }

        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err("connection closed".into());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
