//! 连接网关：接受循环、读循环与解码后包的分发。
//! The connection gateway: accept loop, read loop, and dispatch of
//! decoded packets.
//!
//! 网关消费编解码器、心跳监护器与消息重试服务器；所有依赖都在构造时
//! 显式注入，不存在任何全局注册表。
//!
//! The gateway consumes the codec, the heartbeat supervisor and the
//! message retry server; every dependency is injected explicitly at
//! construction time and there are no global registries.

use async_trait::async_trait;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream, tcp::OwnedReadHalf};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::connection::{Connection, ConnectionId, TcpLink, generate_connection_id};
use crate::error::Result;
use crate::heartbeat::HeartbeatSupervisor;
use crate::packet::codec::Codec;
use crate::packet::{Flow, Packet};
use crate::retry::MessageRetryServer;

const READ_BUFFER_SIZE: usize = 4096;

/// Collaborator receiving request-flow packets the core does not handle
/// itself (login commands, inbound chat messages, ...).
///
/// 接收核心自身不处理的请求方向包（登录指令、入站聊天消息等）的协作方。
#[async_trait]
pub trait PacketHandler: Send + Sync {
    /// Called once when a connection has been accepted and registered.
    /// 连接被接受并注册后调用一次。
    async fn on_connect(&self, _connection: &Arc<Connection>) {}

    /// Handles one request-flow packet.
    /// 处理一个请求方向的包。
    async fn handle(&self, connection: &Arc<Connection>, packet: Packet) -> Result<()>;
}

/// Owns the accept loop and per-connection read loops, and wires
/// decoded packets to the reliability core.
///
/// 持有接受循环与每连接读循环，将解码后的包接入可靠性核心。
pub struct ConnectionGateway {
    codec: Codec,
    heartbeat: Arc<HeartbeatSupervisor>,
    retry: Arc<MessageRetryServer>,
    handler: Arc<dyn PacketHandler>,
    connections: DashMap<ConnectionId, Arc<Connection>>,
}

impl ConnectionGateway {
    /// Creates a gateway with its collaborators injected.
    /// 创建网关并注入其协作方。
    pub fn new(
        codec: Codec,
        heartbeat: Arc<HeartbeatSupervisor>,
        retry: Arc<MessageRetryServer>,
        handler: Arc<dyn PacketHandler>,
    ) -> Arc<Self> {
        Arc::new(Self {
            codec,
            heartbeat,
            retry,
            handler,
            connections: DashMap::new(),
        })
    }

    /// Runs the accept loop until the listener fails.
    /// 运行接受循环，直至监听器出错。
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(addr = ?listener.local_addr().ok(), "Gateway listening");
        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let gateway = self.clone();
            tokio::spawn(async move {
                gateway.serve(stream, remote_addr).await;
            });
        }
    }

    /// Delivers an outbound packet, registering it for acknowledged
    /// delivery when it requires one.
    ///
    /// 投递一个出站包，需要确认时将其登记为需确认投递。
    pub async fn push(&self, connection: &Arc<Connection>, packet: Packet) -> Result<()> {
        let frame = self.codec.encode(&packet)?;
        let first_send = Instant::now();
        connection.write(frame).await?;
        trace!(
            connection_id = connection.id(),
            message_id = ?packet.id(),
            "Packet pushed"
        );

        if packet.need_ack() {
            self.retry.submit(packet, connection.clone(), first_send)?;
        }
        Ok(())
    }

    /// Looks up a live connection by id.
    /// 按id查找存活连接。
    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(&id).map(|entry| entry.value().clone())
    }

    /// The number of currently registered connections.
    /// 当前已注册的连接数。
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Serves one accepted socket until EOF or a fatal error.
    /// 服务一个已接受的套接字，直至EOF或致命错误。
    async fn serve(self: Arc<Self>, stream: TcpStream, remote_addr: SocketAddr) {
        let (read_half, write_half) = stream.into_split();
        let id = generate_connection_id();
        let connection = Connection::new(id, Box::new(TcpLink::new(write_half, Some(remote_addr))));

        self.connections.insert(id, connection.clone());
        if let Err(e) = self.heartbeat.submit(connection.clone()) {
            error!(connection_id = id, error = %e, "Failed to start heartbeat supervision");
            self.teardown(&connection).await;
            return;
        }
        debug!(connection_id = id, %remote_addr, "Connection accepted");
        self.handler.on_connect(&connection).await;

        self.read_loop(read_half, &connection).await;
        self.teardown(&connection).await;
    }

    /// Reads bytes, decodes frames, dispatches packets.
    /// 读取字节、解码帧、分发包。
    async fn read_loop(&self, mut read_half: OwnedReadHalf, connection: &Arc<Connection>) {
        let mut decoder = self.codec.decoder();
        let mut buf = [0u8; READ_BUFFER_SIZE];

        loop {
            let n = match read_half.read(&mut buf).await {
                Ok(0) => {
                    if decoder.finish().is_err() {
                        warn!(
                            connection_id = connection.id(),
                            buffered = decoder.buffered(),
                            "Peer closed mid-frame"
                        );
                    }
                    return;
                }
                Ok(n) => n,
                Err(e) => {
                    debug!(connection_id = connection.id(), error = %e, "Read failed");
                    return;
                }
            };

            let packets = match decoder.decode(&buf[..n]) {
                Ok(packets) => packets,
                // Decode errors are fatal to the connection.
                // 解码错误对连接是致命的。
                Err(e) => {
                    error!(connection_id = connection.id(), error = %e, "Decode failed");
                    return;
                }
            };

            for packet in packets {
                if let Err(e) = self.dispatch(connection, packet).await {
                    warn!(connection_id = connection.id(), error = %e, "Dispatch failed");
                    return;
                }
            }
        }
    }

    /// Routes one decoded packet.
    /// 路由一个解码后的包。
    async fn dispatch(&self, connection: &Arc<Connection>, packet: Packet) -> Result<()> {
        match &packet {
            // Touch the supervisor and echo the frame back.
            // 触达监护器并将帧原样回显。
            Packet::Heartbeat { value } => {
                trace!(connection_id = connection.id(), value, "Heartbeat received");
                self.heartbeat.on_heartbeat_received(connection);
                let frame = self.codec.encode(&packet)?;
                connection.write(frame).await
            }
            Packet::Command(envelope) | Packet::Message(envelope) => match envelope.flow {
                // A response acknowledges the request it correlates to.
                // 响应对其关联的请求进行确认。
                Flow::Response => {
                    self.retry.ack(&envelope.id);
                    Ok(())
                }
                Flow::Request => self.handler.handle(connection, packet).await,
            },
        }
    }

    /// Cancels supervision, closes the link and deregisters.
    /// 取消监护、关闭链路并注销。
    async fn teardown(&self, connection: &Arc<Connection>) {
        self.heartbeat.stop(connection.id());
        connection.close().await;
        self.connections.remove(&connection.id());
        debug!(connection_id = connection.id(), "Connection torn down");
    }
}
