use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use tokio_postgres::{Config, NoTls};

const NIGHTS_PER_STAY: u64 = 2;

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname("innkeep")
        .user("bench")
        .password(&std::env::var("INNKEEP_PASSWORD").unwrap_or_else(|_| "innkeep".into()));

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

/// Check-in date of the `i`th back-to-back stay, starting in 2030.
fn stay_dates(i: u64) -> (NaiveDate, NaiveDate) {
    let base = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
    let check_in = base.checked_add_days(Days::new(i * NIGHTS_PER_STAY)).unwrap();
    (check_in, check_in.checked_add_days(Days::new(NIGHTS_PER_STAY)).unwrap())
}

async fn create_room(client: &tokio_postgres::Client, name: &str) -> String {
    let rows = client
        .simple_query(&format!("INSERT INTO rooms (name) VALUES ('{name}') RETURNING id"))
        .await
        .unwrap();
    rows.into_iter()
        .find_map(|m| match m {
            tokio_postgres::SimpleQueryMessage::Row(row) => row.get("id").map(str::to_string),
            _ => None,
        })
        .expect("no room id returned")
}

async fn book(client: &tokio_postgres::Client, room: &str, i: u64) -> Result<(), tokio_postgres::Error> {
    let (check_in, check_out) = stay_dates(i);
    client
        .batch_execute(&format!(
            "INSERT INTO reservations (first_name, last_name, email, phone, check_in, check_out, room_id) \
             VALUES ('Bench', 'Guest', 'bench@example.com', '', '{check_in}', '{check_out}', '{room}')"
        ))
        .await
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port).await;
    let room = create_room(&client, "bench sequential").await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n as u64 {
        let t = Instant::now();
        book(&client, &room, i).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} reservations in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent(host: &str, port: u16) {
    let n_tasks = 10;
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();

    for t in 0..n_tasks {
        let host = host.to_string();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let room = create_room(&client, &format!("bench concurrent {t}")).await;
            for j in 0..n_per_task {
                book(&client, &room, j).await.unwrap();
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} reservations = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_contention(host: &str, port: u16) {
    let setup = connect(host, port).await;
    let room = create_room(&setup, "bench contested").await;
    drop(setup);

    let n_tasks = 20;
    let n_stays = 50;
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let host = host.to_string();
        let room = room.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut won = 0u64;
            for i in 0..n_stays {
                if book(&client, &room, i).await.is_ok() {
                    won += 1;
                }
            }
            won
        }));
    }

    let mut won = 0;
    for h in handles {
        won += h.await.unwrap();
    }
    println!("  {n_tasks} clients racing for {n_stays} stays: {won} booked");
    assert_eq!(won, n_stays, "every stay booked exactly once");
}

async fn phase4_search_under_load(host: &str, port: u16) {
    let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5 {
        let host = host.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let room = create_room(&client, &format!("bench writer {w}")).await;
            let mut i = 0u64;
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                let _ = book(&client, &room, i).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let searches_per_reader = 500;
    let mut reader_handles = Vec::new();

    for r in 0..n_readers {
        let host = host.to_string();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut latencies = Vec::with_capacity(searches_per_reader);
            for s in 0..searches_per_reader as u64 {
                let (check_in, check_out) = stay_dates(r * 37 + s % 300);
                let t = Instant::now();
                client
                    .batch_execute(&format!(
                        "SELECT * FROM available_rooms WHERE check_in = '{check_in}' AND check_out = '{check_out}'"
                    ))
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("availability search", &mut all_latencies);
}

async fn phase5_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

    for c in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let room = create_room(&client, &format!("bench storm {c}")).await;
            for i in 0..ops_per_conn {
                book(&client, &room, i).await.unwrap();
            }
            success.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(std::sync::atomic::Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("INNKEEP_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("INNKEEP_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid INNKEEP_PORT");

    println!("=== innkeep stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential write throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] concurrent write throughput");
    phase2_concurrent(&host, port).await;

    println!("\n[phase 3] double-booking contention");
    phase3_contention(&host, port).await;

    println!("\n[phase 4] search latency under write load");
    phase4_search_under_load(&host, port).await;

    println!("\n[phase 5] connection storm");
    phase5_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
