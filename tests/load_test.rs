//! Load testing for a shared pipeline.

use std::time::{Duration, Instant};

use axum::body::Body;
use futures_util::future::join_all;

use resilient_transport::pipeline;

mod common;

#[tokio::test]
async fn test_load_performance() {
    let backend = common::start_mock_backend("Hello from backend").await;
    let client = pipeline::build(&common::fast_config()).unwrap();

    let total_requests = 500;
    let concurrency = 50;
    let start = Instant::now();

    for _ in 0..(total_requests / concurrency) {
        let batch = (0..concurrency).map(|_| {
            let client = client.clone();
            let url = backend.url("/");
            async move {
                let req = http::Request::get(url).body(Body::empty()).unwrap();
                let res = client.send(req).await.unwrap();
                axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap()
            }
        });
        for body in join_all(batch).await {
            assert_eq!(body, "Hello from backend");
        }
    }

    let duration = start.elapsed();
    let rps = total_requests as f64 / duration.as_secs_f64();
    println!("Load Test Results:");
    println!("Total Requests: {}", total_requests);
    println!("Total Duration: {:?}", duration);
    println!("Requests Per Second: {:.2}", rps);

    assert_eq!(backend.hits(), total_requests as u32);
    assert!(duration < Duration::from_secs(30));
}
