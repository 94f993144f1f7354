//! Load testing for the cache gateway.

use std::time::{Duration, Instant};

mod common;

#[tokio::test]
async fn test_load_performance() {
    // 1. Start gateway over the memory store
    let mut config = common::test_config();
    config.pool.max_size = 8;
    config.pool.acquire_timeout_ms = 2_000;
    let gateway = common::TestGateway::start(config).await;

    // 2. Run load: each task writes five keys, then reads them back
    let concurrency = 20;
    let requests_per_task = 50;
    let total_requests = concurrency * requests_per_task;

    let client = common::client();
    let start = Instant::now();

    let mut tasks = Vec::new();
    for task_id in 0..concurrency {
        let client = client.clone();
        let base = gateway.url("/api/v1/cache");
        tasks.push(tokio::spawn(async move {
            let mut latencies = Vec::new();
            for i in 0..requests_per_task {
                let url = format!("{}/load:{}:{}", base, task_id, i % 5);
                let req_start = Instant::now();
                let res = if i < 5 {
                    client.put(&url).body(format!("v{i}")).send().await
                } else {
                    client.get(&url).send().await
                };
                if let Ok(res) = res {
                    if res.status().is_success() {
                        latencies.push(req_start.elapsed());
                    }
                }
            }
            latencies
        }));
    }

    let mut all_latencies: Vec<Duration> = Vec::new();
    for task in tasks {
        all_latencies.extend(task.await.unwrap());
    }

    let duration = start.elapsed();
    let rps = total_requests as f64 / duration.as_secs_f64();

    assert_eq!(all_latencies.len(), total_requests, "every request should succeed");

    // 3. Pool stayed within bounds and every lease came back
    let status = gateway.pool.status();
    assert!(status.open <= status.max_size);
    assert_eq!(status.leased, 0);
    assert_eq!(status.acquired, status.released);
    assert_eq!(status.exhausted, 0);

    all_latencies.sort();
    let p50 = all_latencies[all_latencies.len() / 2];
    let p95 = all_latencies[(all_latencies.len() as f64 * 0.95) as usize];
    let p99 = all_latencies[(all_latencies.len() as f64 * 0.99) as usize];

    println!("\n--- Load Test Results ---");
    println!("Total Requests: {}", total_requests);
    println!("Concurrency:    {}", concurrency);
    println!("Total Duration: {:?}", duration);
    println!("Requests/sec:   {:.2}", rps);
    println!("P50 Latency:    {:?}", p50);
    println!("P95 Latency:    {:?}", p95);
    println!("P99 Latency:    {:?}", p99);
    println!("Pool:           open={} created={}", status.open, status.created);
    println!("-------------------------\n");

    gateway.stop().await;
}
