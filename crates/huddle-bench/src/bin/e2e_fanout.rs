//! End-to-end fan-out benchmark for Huddle.
//!
//! Connects N clients to a running server as members of one chat; every
//! client sends messages to the whole chat and counts the `message` events
//! it receives.
//!
//! The token secret is read from `HUDDLE_AUTH__JWT_SECRET` and must match the
//! server's.

use futures_util::{SinkExt, StreamExt};
use huddle_protocol::{ClientFrame, Event, UserId};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8080/ws";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;
const SEND_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Serialize)]
struct Claims<'a> {
    sub: &'a str,
    name: &'a str,
    exp: i64,
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let server_url =
        std::env::var("HUDDLE_URL").unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string());
    let secret = std::env::var("HUDDLE_AUTH__JWT_SECRET").unwrap_or_else(|_| "change-me".into());

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║           Huddle End-to-End Fan-out Benchmark                ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Make sure the server is running: cargo run --release        ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    run_fanout_benchmark(num_clients, server_url, secret).await;
}

async fn run_fanout_benchmark(num_clients: usize, server_url: String, secret: String) {
    println!("📊 Fan-out Benchmark: {} clients in one chat", num_clients);
    println!("   Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let members: Arc<Vec<UserId>> = Arc::new(
        (0..num_clients)
            .map(|i| UserId::new(format!("bench-{}", i)))
            .collect(),
    );
    let sent_count = Arc::new(AtomicU64::new(0));
    let received_count = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();

    for client_id in 0..num_clients {
        let client = Client {
            id: client_id,
            url: server_url.clone(),
            secret: secret.clone(),
            members: Arc::clone(&members),
            sent: Arc::clone(&sent_count),
            received: Arc::clone(&received_count),
            barrier: Arc::clone(&barrier),
        };

        handles.push(tokio::spawn(async move {
            if let Err(e) = client.run().await {
                eprintln!("Client {} error: {}", client_id, e);
            }
        }));
    }

    // Wait for all clients to connect
    barrier.wait().await;
    println!("✓ All {} clients connected", num_clients);

    println!("⏳ Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    sent_count.store(0, Ordering::SeqCst);
    received_count.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("📈 Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let sent = sent_count.load(Ordering::SeqCst);
    let received = received_count.load(Ordering::SeqCst);
    let expected = sent * num_clients as u64;
    let delivery_ratio = if expected == 0 {
        0.0
    } else {
        received as f64 / expected as f64 * 100.0
    };

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                         RESULTS                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!(
        "║  Clients:              {:>10}                           ║",
        num_clients
    );
    println!(
        "║  Duration:             {:>10.2}s                          ║",
        elapsed.as_secs_f64()
    );
    println!("║  Messages Sent:        {:>10}                           ║", sent);
    println!(
        "║  Events Received:      {:>10}                           ║",
        received
    );
    println!(
        "║  Delivery:             {:>10.1}%                          ║",
        delivery_ratio
    );
    println!(
        "║  Fan-out Rate:         {:>10.0} evt/s                    ║",
        received as f64 / elapsed.as_secs_f64()
    );
    println!("╚══════════════════════════════════════════════════════════════╝");

    for handle in handles {
        handle.abort();
    }
}

struct Client {
    id: usize,
    url: String,
    secret: String,
    members: Arc<Vec<UserId>>,
    sent: Arc<AtomicU64>,
    received: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
}

impl Client {
    async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let user = &self.members[self.id];
        let claims = Claims {
            sub: user.as_str(),
            name: user.as_str(),
            exp: chrono::Utc::now().timestamp() + 3600,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?;

        let (ws, _) = connect_async(format!("{}?token={}", self.url, token)).await?;
        let (mut sender, mut receiver) = ws.split();

        // First event is always the presence list
        let _presence = receiver.next().await;

        self.barrier.wait().await;

        let frame = ClientFrame::new_message("bench", self.members.to_vec(), "x".repeat(64));
        let message = Message::Text(serde_json::to_string(&frame)?);

        let received = Arc::clone(&self.received);
        let recv_task = tokio::spawn(async move {
            while let Some(result) = receiver.next().await {
                if let Ok(Message::Text(text)) = result {
                    if let Ok(Event::Message { .. }) = serde_json::from_str::<Event>(&text) {
                        received.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        });

        let mut ticker = tokio::time::interval(SEND_INTERVAL);
        loop {
            ticker.tick().await;
            if sender.send(message.clone()).await.is_err() {
                break;
            }
            self.sent.fetch_add(1, Ordering::Relaxed);
        }

        recv_task.abort();
        Ok(())
    }
}
