//! End-to-end throughput benchmark for umlsync.
//!
//! Every client joins one room and streams diagram updates through a running
//! server; the benchmark counts relayed `diagram_update` events.
//!
//! ```bash
//! e2e_throughput [clients] [url]
//! ```

use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use umlsync_protocol::{codec, ClientEvent, ServerEvent};

const DEFAULT_URL: &str = "ws://127.0.0.1:5001/plantuml-sync";
const ROOM: &str = "benchmark";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let url = args.get(2).cloned().unwrap_or_else(|| DEFAULT_URL.to_string());

    println!("umlsync end-to-end throughput benchmark");
    println!("  server:  {}", url);
    println!("  clients: {}", num_clients);
    println!("  warmup:  {}s, measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    run_relay_benchmark(num_clients, Arc::new(url)).await;
}

async fn run_relay_benchmark(num_clients: usize, url: Arc<String>) {
    let relayed = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();

    for client_id in 0..num_clients {
        let relayed = Arc::clone(&relayed);
        let barrier = Arc::clone(&barrier);
        let url = Arc::clone(&url);

        handles.push(tokio::spawn(async move {
            if let Err(e) = run_client(client_id, &url, relayed, barrier).await {
                eprintln!("Client {} error: {}", client_id, e);
            }
        }));
    }

    // Wait for all clients to join the room
    barrier.wait().await;
    println!("All {} clients joined {}", num_clients, ROOM);

    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    relayed.store(0, Ordering::SeqCst);
    let start = Instant::now();
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total = relayed.load(Ordering::SeqCst);
    let per_sec = total as f64 / elapsed.as_secs_f64();

    println!();
    println!("Results");
    println!("  duration:         {:>10.2}s", elapsed.as_secs_f64());
    println!("  relayed updates:  {:>10}", total);
    println!("  throughput:       {:>10.0} events/s", per_sec);
    println!("  per client:       {:>10.0} events/s", per_sec / num_clients as f64);

    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    client_id: usize,
    url: &str,
    relayed: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    // The server greets every connection with `connected`
    let _connected = receiver.next().await;

    let join = codec::encode(&ClientEvent::join(ROOM))?;
    sender.send(Message::Text(join)).await?;

    barrier.wait().await;

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(ServerEvent::DiagramUpdate { .. }) = codec::decode_server(&text) {
                    relayed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    });

    let mut revision = 0u64;
    loop {
        let text = format!("@startuml\nclient{} -> server: rev {}\n@enduml\n", client_id, revision);
        revision += 1;
        let update = codec::encode(&ClientEvent::diagram_update(ROOM, text, None))?;
        if sender.send(Message::Text(update)).await.is_err() {
            break;
        }
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
