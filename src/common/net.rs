//! TCP plumbing shared by the metadata and data servers
//!
//! Accepted connections go through a bounded queue to a fixed pool of worker
//! tasks. Each worker owns one connection at a time, serves it under a
//! deadline and drops it on every exit path.

use crate::common::{Error, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::timeout;

/// Worker pool sizing and per-connection deadline
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub workers: usize,
    pub queue_depth: usize,
    pub io_timeout: Duration,
}

/// Accept connections until `shutdown` flips to true.
///
/// `handler` is called once per connection. Its error is logged; the
/// connection is closed either way.
pub async fn serve_pool<H, Fut>(
    name: &'static str,
    listener: TcpListener,
    pool: PoolConfig,
    handler: H,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    H: Fn(TcpStream, SocketAddr) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<(TcpStream, SocketAddr)>(pool.queue_depth.max(1));
    let rx = Arc::new(Mutex::new(rx));
    let handler = Arc::new(handler);

    let mut workers = Vec::with_capacity(pool.workers);
    for worker_id in 0..pool.workers.max(1) {
        let rx = rx.clone();
        let handler = handler.clone();
        let io_timeout = pool.io_timeout;
        workers.push(tokio::spawn(async move {
            loop {
                let next = rx.lock().await.recv().await;
                let Some((stream, peer)) = next else { break };
                match timeout(io_timeout, handler(stream, peer)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!("{} worker {}: connection from {} failed: {}", name, worker_id, peer, e)
                    }
                    Err(_) => {
                        tracing::warn!("{} worker {}: connection from {} timed out", name, worker_id, peer)
                    }
                }
            }
        }));
    }

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!("{}: accepted connection from {}", name, peer);
                        // A full queue must not hide a shutdown request
                        tokio::select! {
                            sent = tx.send((stream, peer)) => {
                                if sent.is_err() {
                                    break;
                                }
                            }
                            changed = shutdown.changed() => {
                                if changed.is_err() || *shutdown.borrow() {
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => tracing::error!("{}: accept error: {}", name, e),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    // Closing the queue lets workers finish what they hold, then exit
    drop(tx);
    drop(listener);
    for worker in workers {
        let _ = worker.await;
    }
    tracing::info!("{} stopped", name);
    Ok(())
}

/// Connect to a peer, mapping failures to `NodeUnreachable`
pub async fn connect(addr: &str, connect_timeout: Duration) -> Result<TcpStream> {
    match timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            stream.set_nodelay(true)?;
            Ok(stream)
        }
        Ok(Err(e)) => Err(Error::NodeUnreachable(format!("{}: {}", addr, e))),
        Err(_) => Err(Error::NodeUnreachable(format!("{}: connect timed out", addr))),
    }
}

/// Run one request/response exchange under a deadline
pub async fn with_deadline<T, F>(addr: &str, deadline: Duration, exchange: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(deadline, exchange).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!("request to {} timed out", addr))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_pool_serves_and_stops() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let served = Arc::new(AtomicUsize::new(0));

        let counter = served.clone();
        let server = tokio::spawn(serve_pool(
            "echo",
            listener,
            PoolConfig {
                workers: 2,
                queue_depth: 4,
                io_timeout: Duration::from_secs(5),
            },
            move |mut stream: TcpStream, _peer| {
                let counter = counter.clone();
                async move {
                    let mut b = [0u8; 1];
                    stream.read_exact(&mut b).await?;
                    stream.write_all(&b).await?;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), Error>(())
                }
            },
            shutdown_rx,
        ));

        for i in 0..5u8 {
            let mut stream = connect(&addr.to_string(), Duration::from_secs(1)).await.unwrap();
            stream.write_all(&[i]).await.unwrap();
            let mut b = [0u8; 1];
            stream.read_exact(&mut b).await.unwrap();
            assert_eq!(b[0], i);
        }

        shutdown_tx.send(true).unwrap();
        server.await.unwrap().unwrap();
        assert_eq!(served.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_shutdown_with_full_queue() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (release_tx, release_rx) = watch::channel(false);

        let server = tokio::spawn(serve_pool(
            "stuck",
            listener,
            PoolConfig {
                workers: 1,
                queue_depth: 1,
                io_timeout: Duration::from_secs(30),
            },
            move |_stream: TcpStream, _peer| {
                let mut release = release_rx.clone();
                async move {
                    loop {
                        let released = *release.borrow_and_update();
                        if released || release.changed().await.is_err() {
                            break;
                        }
                    }
                    Ok::<(), Error>(())
                }
            },
            shutdown_rx,
        ));

        // One connection held by the worker, one queued, one waiting for room
        let mut held = Vec::new();
        for _ in 0..3 {
            held.push(connect(&addr, Duration::from_secs(1)).await.unwrap());
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        shutdown_tx.send(true).unwrap();
        let mut closed = false;
        for _ in 0..20 {
            if connect(&addr, Duration::from_millis(200)).await.is_err() {
                closed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(closed, "listener still open after shutdown");

        release_tx.send(true).unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connect_failure_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = connect(&addr, Duration::from_millis(500)).await.unwrap_err();
        assert!(matches!(err, Error::NodeUnreachable(_)));
    }
}
