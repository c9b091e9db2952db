//! Stress test for minidfs: concurrent clients against one cluster

mod common;

use common::Cluster;
use minidfs::common::Error;
use std::sync::Arc;
use std::time::Instant;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_concurrent_write_read() {
    let cluster = Cluster::start(2, 3).await;
    let client = Arc::new(cluster.client());

    let n = 64;
    let start = Instant::now();
    let mut handles = Vec::new();
    for i in 0..n {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let data = format!("stress value {}", i).into_bytes();
            client
                .write_file(&format!("/stress/{}/file", i % 8), &data)
                .await
                .map(|_| ())
                .or_else(|e| match e {
                    // Eight writers share each path; the losers see AlreadyExists
                    Error::AlreadyExists(_) => Ok(()),
                    other => Err(other),
                })
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    let write_time = start.elapsed();

    let start = Instant::now();
    for dir in 0..8 {
        let path = format!("/stress/{}/file", dir);
        let data = client.read_all(&path).await.unwrap();
        assert!(String::from_utf8(data).unwrap().starts_with("stress value "));
    }
    let read_time = start.elapsed();

    assert_eq!(client.list_files("/stress").await.unwrap().len(), 8);
    println!("Write {} files: {:?}", n, write_time);
    println!("Read 8 files: {:?}", read_time);
    assert!(write_time.as_secs_f64() < 30.0, "Write too slow");

    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_racing_creates_have_one_winner() {
    let cluster = Cluster::start(1, 0).await;
    let client = Arc::new(cluster.client());

    let mut handles = Vec::new();
    for _ in 0..16 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            client.create_directory("/race/target").await
        }));
    }

    let mut wins = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => wins += 1,
            Err(Error::AlreadyExists(_)) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(client.list_files("/race").await.unwrap(), vec!["target"]);

    cluster.shutdown().await;
}
