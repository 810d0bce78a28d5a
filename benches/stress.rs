use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use ulid::Ulid;

use camperbook::engine::{BookingEngine, BookingOutcome};
use camperbook::model::{DateRange, Item, NewItem, Price};
use camperbook::store::{ItemStore, MemoryStore, WalStore};

const ITEMS: usize = 20;
const CLIENTS: usize = 64;
const REQUESTS_PER_CLIENT: usize = 200;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.3}ms, p50={:.3}ms, p95={:.3}ms, p99={:.3}ms, max={:.3}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

async fn setup(store: &dyn ItemStore) -> Vec<Ulid> {
    let owner = Ulid::new();
    let mut ids = Vec::new();
    for i in 0..ITEMS {
        let item = Item::new(
            Ulid::new(),
            owner,
            NewItem {
                title: format!("Camper {i}"),
                description: None,
                price_per_day: Price::from_cents(7_500),
                image: None,
            },
        )
        .unwrap();
        ids.push(item.id);
        store.create_item(item).await.unwrap();
    }
    println!("  created {} items", ids.len());
    ids
}

/// Random-ish week-long ranges over one year, so some requests collide and some land.
fn range_for(seed: usize) -> DateRange {
    let base = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
    let offset = (seed.wrapping_mul(2_654_435_761) % 358) as u64;
    let start = base.checked_add_days(Days::new(offset)).unwrap();
    let end = start.checked_add_days(Days::new(6)).unwrap();
    DateRange::new(start, end).unwrap()
}

async fn run(label: &str, store: Arc<dyn ItemStore>) {
    println!("{label}");
    let ids = Arc::new(setup(store.as_ref()).await);
    let engine = Arc::new(BookingEngine::new(store, Duration::from_secs(5)));

    let started = Instant::now();
    let mut handles = Vec::new();
    for client in 0..CLIENTS {
        let engine = engine.clone();
        let ids = ids.clone();
        handles.push(tokio::spawn(async move {
            let user = Ulid::new();
            let mut booked = Vec::new();
            let mut rejected = Vec::new();
            for n in 0..REQUESTS_PER_CLIENT {
                let seed = client * REQUESTS_PER_CLIENT + n;
                let item = ids[seed % ids.len()];
                let t = Instant::now();
                let outcome = engine.request_booking(item, user, range_for(seed)).await;
                let elapsed = t.elapsed();
                match outcome {
                    Ok(BookingOutcome::Booked(_)) => booked.push(elapsed),
                    Ok(BookingOutcome::Rejected { .. }) => rejected.push(elapsed),
                    Err(e) => eprintln!("booking failed: {e}"),
                }
            }
            (booked, rejected)
        }));
    }

    let mut booked = Vec::new();
    let mut rejected = Vec::new();
    for handle in handles {
        let (b, r) = handle.await.unwrap();
        booked.extend(b);
        rejected.extend(r);
    }
    let wall = started.elapsed();
    let total = booked.len() + rejected.len();
    println!(
        "  {total} requests in {:.2}s ({:.0} req/s)",
        wall.as_secs_f64(),
        total as f64 / wall.as_secs_f64()
    );
    print_latency("booked", &mut booked);
    print_latency("rejected", &mut rejected);
}

#[tokio::main]
async fn main() {
    run("memory store", Arc::new(MemoryStore::new())).await;

    let dir = std::env::temp_dir().join(format!("camperbook_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let wal_store = WalStore::open(&dir.join("items.wal")).unwrap();
    run("wal store", Arc::new(wal_store)).await;
    let _ = std::fs::remove_dir_all(&dir);
}
