//! Data server client

use crate::common::net::{connect, with_deadline};
use crate::common::{DataOp, FrameReader, FrameWriter, ReplicaTarget, Result};
use std::time::Duration;
use tokio::net::TcpStream;

#[derive(Debug, Clone)]
pub struct DataClient {
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl DataClient {
    pub fn new(connect_timeout: Duration, io_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            io_timeout,
        }
    }

    /// Send one request and return a reader positioned at the success payload
    async fn call(&self, addr: &str, request: FrameWriter) -> Result<FrameReader<TcpStream>> {
        let mut stream = connect(addr, self.connect_timeout).await?;
        request.send(&mut stream).await?;
        let mut reader = FrameReader::new(stream);
        reader.read_status().await?;
        Ok(reader)
    }

    /// Store `data` as `block_id` on `addr`, asking it to forward to `siblings`
    pub async fn write_block(
        &self,
        addr: &str,
        block_id: &str,
        file_id: &str,
        siblings: &[ReplicaTarget],
        data: &[u8],
    ) -> Result<()> {
        let mut req = FrameWriter::request(DataOp::WriteFile as u8);
        req.put_str(block_id)?
            .put_str(file_id)?
            .put_i32(siblings.len() as i32);
        for sibling in siblings {
            req.put_str(&sibling.node_id)?
                .put_str(&sibling.addr)?
                .put_str(&sibling.block_id)?;
        }
        req.put_bytes(data)?;

        with_deadline(addr, self.io_timeout, async {
            let mut r = self.call(addr, req).await?;
            r.read_str().await.map(|_| ())
        })
        .await
    }

    /// Exactly `length` bytes of `block_id` starting at `offset`
    pub async fn read_block(
        &self,
        addr: &str,
        block_id: &str,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>> {
        let mut req = FrameWriter::request(DataOp::ReadFile as u8);
        req.put_str(block_id)?
            .put_i64(offset as i64)
            .put_i64(length as i64);

        with_deadline(addr, self.io_timeout, async {
            let mut r = self.call(addr, req).await?;
            r.read_bytes().await
        })
        .await
    }

    pub async fn close_block(&self, addr: &str, block_id: &str) -> Result<()> {
        let mut req = FrameWriter::request(DataOp::CloseFile as u8);
        req.put_str(block_id)?;
        with_deadline(addr, self.io_timeout, async {
            let mut r = self.call(addr, req).await?;
            r.read_str().await.map(|_| ())
        })
        .await
    }

    pub async fn delete_block(&self, addr: &str, block_id: &str) -> Result<()> {
        let mut req = FrameWriter::request(DataOp::DeleteBlock as u8);
        req.put_str(block_id)?;
        with_deadline(addr, self.io_timeout, async {
            let mut r = self.call(addr, req).await?;
            r.read_str().await.map(|_| ())
        })
        .await
    }
}
