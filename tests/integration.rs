//! Integration tests for minidfs

mod common;

use common::{wait_until, Cluster};
use minidfs::common::{MetaOp, ReplicaState};
use minidfs::Error;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[tokio::test]
async fn test_write_then_read() {
    let cluster = Cluster::start(3, 3).await;
    let client = cluster.client();

    let data = b"the quick brown fox jumps over the lazy dog".to_vec();
    let outcome = client.write_file("/f", &data).await.unwrap();
    assert_eq!(outcome.locations.len(), 3);
    assert!(!outcome.degraded);

    assert_eq!(
        client.read_file("/f", 0, data.len() as u64).await.unwrap(),
        data
    );
    assert_eq!(client.read_file("/f", 4, 5).await.unwrap(), b"quick");
    assert_eq!(client.file_size("/f").await.unwrap(), data.len() as u64);

    let err = client.read_file("/f", 40, 10).await.unwrap_err();
    assert_eq!(err.status_code(), -6);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_replicas_are_confirmed() {
    let cluster = Cluster::start(3, 3).await;
    let client = cluster.client();

    client.write_file("/data/replicated", b"abc").await.unwrap();

    let client = &client;
    wait_until(Duration::from_secs(10), move || async move {
        let info = client.file_info("/data/replicated").await.unwrap();
        info.replica_states
            .iter()
            .all(|s| *s == ReplicaState::Confirmed)
    })
    .await;

    let info = client.file_info("/data/replicated").await.unwrap();
    for location in &info.locations {
        let node = cluster.node(&location.node_id);
        assert!(node.storage.join(format!("{}.blk", location.block_id)).exists());
    }

    // The primary counts a copy once the sibling has acked it
    let nodes = &cluster.nodes;
    wait_until(Duration::from_secs(10), move || async move {
        nodes.iter().map(|n| n.service.stats().forwarded).sum::<u64>() == 2
    })
    .await;

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_degraded_placement() {
    let cluster = Cluster::start(3, 2).await;
    let client = cluster.client();

    let outcome = client.write_file("/degraded", b"two copies").await.unwrap();
    assert_eq!(outcome.locations.len(), 2);
    assert!(outcome.degraded);
    assert_eq!(client.read_file("/degraded", 0, 10).await.unwrap(), b"two copies");

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_namespace_operations() {
    let cluster = Cluster::start(1, 1).await;
    let client = cluster.client();

    client.create_directory("/home").await.unwrap();
    client.create_directory("/scs").await.unwrap();
    assert_eq!(client.list_files("/").await.unwrap(), vec!["home", "scs"]);

    // Missing parents are created
    client.write_file("/home/alice/notes.txt", b"hi").await.unwrap();
    assert_eq!(client.list_files("/home").await.unwrap(), vec!["alice"]);
    let parent = client.file_info("/home/alice").await.unwrap();
    assert!(parent.is_directory);

    client
        .rename("/home/alice", "/scs/alice")
        .await
        .unwrap();
    assert!(client.list_files("/home").await.unwrap().is_empty());
    assert_eq!(
        client.read_file("/scs/alice/notes.txt", 0, 2).await.unwrap(),
        b"hi"
    );

    assert!(matches!(
        client.create_directory("/scs").await,
        Err(Error::AlreadyExists(_))
    ));
    assert!(matches!(
        client.file_info("/nowhere").await,
        Err(Error::NotFound(_))
    ));

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_delete_requires_owner_and_removes_blocks() {
    let cluster = Cluster::start(1, 1).await;
    let alice = cluster.client_as("alice");
    let bob = cluster.client_as("bob");

    let outcome = alice.write_file("/private", b"secret").await.unwrap();
    assert!(matches!(
        bob.delete_file("/private").await,
        Err(Error::PermissionDenied(_))
    ));
    assert_eq!(alice.read_file("/private", 0, 6).await.unwrap(), b"secret");

    alice.delete_file("/private").await.unwrap();
    assert!(matches!(
        alice.file_info("/private").await,
        Err(Error::NotFound(_))
    ));

    let location = &outcome.locations[0];
    let block = cluster
        .node(&location.node_id)
        .storage
        .join(format!("{}.blk", location.block_id));
    assert!(!block.exists());

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_delete_directory_is_recursive() {
    let cluster = Cluster::start(1, 1).await;
    let client = cluster.client();

    let outcome = client.write_file("/tree/sub/leaf", b"leaf").await.unwrap();
    client.delete_file("/tree").await.unwrap();

    assert!(client.list_files("/").await.unwrap().is_empty());
    assert!(matches!(
        client.file_info("/tree/sub/leaf").await,
        Err(Error::NotFound(_))
    ));
    let location = &outcome.locations[0];
    let block = cluster
        .node(&location.node_id)
        .storage
        .join(format!("{}.blk", location.block_id));
    assert!(!block.exists());

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_copy_upload_download() {
    let cluster = Cluster::start(2, 2).await;
    let client = cluster.client();
    let dir = tempfile::tempdir().unwrap();

    let local = dir.path().join("in.bin");
    let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    std::fs::write(&local, &payload).unwrap();

    client.upload_file(&local, "/in.bin").await.unwrap();
    client.copy_file("/in.bin", "/copy.bin").await.unwrap();
    client.move_file("/copy.bin", "/moved.bin").await.unwrap();

    let out = dir.path().join("out.bin");
    let written = client.download_file("/moved.bin", &out).await.unwrap();
    assert_eq!(written, payload.len() as u64);
    assert_eq!(std::fs::read(&out).unwrap(), payload);

    client.close_file("/moved.bin").await.unwrap();
    cluster.shutdown().await;
}

#[tokio::test]
async fn test_create_without_data_nodes_is_degraded() {
    let cluster = Cluster::start(3, 0).await;
    let client = cluster.client();

    let created = client.meta().create_file("/empty", "root", false).await.unwrap();
    assert!(created.locations.is_empty());
    assert!(created.degraded);

    // The entry exists, but no replica can take the bytes
    let err = client.write_file("/f", b"x").await.unwrap_err();
    assert!(matches!(err, Error::NodeUnreachable(_)));
    let info = client.file_info("/f").await.unwrap();
    assert!(info.locations.is_empty());

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_download_when_data_node_cannot_report() {
    let mut cluster = Cluster::start(1, 0).await;
    cluster.add_isolated_node("lonely").await;
    let client = cluster.client();
    let dir = tempfile::tempdir().unwrap();

    let payload = b"size comes from the writer".to_vec();
    let outcome = client.write_file("/f", &payload).await.unwrap();
    assert_eq!(outcome.locations[0].node_id, "lonely");

    let out = dir.path().join("f");
    let written = client.download_file("/f", &out).await.unwrap();
    assert_eq!(written, payload.len() as u64);
    assert_eq!(std::fs::read(&out).unwrap(), payload);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_unconfirmed_file_is_not_read_as_empty() {
    let cluster = Cluster::start(1, 1).await;
    let client = cluster.client();
    let dir = tempfile::tempdir().unwrap();

    // Placed but never written: no replica confirmed, size unknown
    client.meta().create_file("/pending", "root", false).await.unwrap();

    assert!(matches!(
        client.read_all("/pending").await,
        Err(Error::NodeUnreachable(_))
    ));
    let out = dir.path().join("pending");
    assert!(client.download_file("/pending", &out).await.is_err());
    assert!(!out.exists());

    // A genuinely empty file is still readable
    client.write_file("/empty", b"").await.unwrap();
    assert!(client.read_all("/empty").await.unwrap().is_empty());

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_unknown_opcode_closes_connection() {
    let cluster = Cluster::start(1, 0).await;

    let mut stream = tokio::net::TcpStream::connect(cluster.meta_addr).await.unwrap();
    stream.write_all(&[0xEE]).await.unwrap();
    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();
    assert!(reply.is_empty());

    // The server keeps serving well-formed requests
    let mut stream = tokio::net::TcpStream::connect(cluster.meta_addr).await.unwrap();
    stream.write_all(&[MetaOp::ListNodes as u8]).await.unwrap();
    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();
    assert_eq!(&reply[..4], &[0, 0, 0, 0]);

    cluster.shutdown().await;
}
