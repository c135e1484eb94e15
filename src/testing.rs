//! 测试辅助工具模块
//! Test utilities module

#![cfg(test)]

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

use crate::connection::{Connection, Link};
use crate::packet::Packet;
use crate::retry::OfflineStore;

/// A `Link` that records writes and can be told to fail them.
/// 记录写入并可被设置为写入失败的 `Link`。
pub struct MockLink {
    pub writes: AtomicUsize,
    pub closed: AtomicBool,
    pub fail_writes: AtomicBool,
}

impl MockLink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            writes: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        })
    }

    pub fn failing() -> Arc<Self> {
        let link = Self::new();
        link.fail_writes.store(true, Ordering::SeqCst);
        link
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Link for Arc<MockLink> {
    async fn write(&self, _frame: Bytes) -> std::io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(std::io::ErrorKind::BrokenPipe.into());
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Builds a connection over a shared `MockLink`.
/// 基于共享 `MockLink` 构建连接。
pub fn mock_connection(id: u64, link: Arc<MockLink>) -> Arc<Connection> {
    Connection::new(id, Box::new(link))
}

/// An `OfflineStore` that records every resaved packet.
/// 记录每个被转存包的 `OfflineStore`。
pub struct RecordingStore {
    pub resaved: Mutex<Vec<Packet>>,
}

impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            resaved: Mutex::new(Vec::new()),
        })
    }

    pub async fn resave_count(&self) -> usize {
        self.resaved.lock().await.len()
    }
}

#[async_trait]
impl OfflineStore for RecordingStore {
    async fn resave(&self, packet: &Packet, _connection: &Connection) {
        self.resaved.lock().await.push(packet.clone());
    }
}
