//! Per-peer protocol engine.
//!
//! Each live peer runs two tasks: a heartbeat loop driving the failure
//! detector and a receive loop decoding and dispatching inbound packets.
//! Sends happen inline on whichever task calls them, serialized by the
//! writer lock. Disconnection is the single teardown path: it closes the
//! transport, cancels both loops, fails outstanding replies, and removes
//! the peer from the registry.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_rustls::TlsStream;
use tokio_util::codec::{FramedRead, FramedWrite};

use lattice_core::NodeId;
use lattice_ring::NodeDescriptor;

use crate::error::{ClusterError, ClusterResult};
use crate::node::ClusterContext;
use crate::peer::replies::ReplyTable;
use crate::peer::state::PeerState;
use crate::protocol::{command, Command, KvCommand, KvPacket, Packet, PacketCodec, PacketId};

type BoxedReader = FramedRead<Box<dyn AsyncRead + Send + Unpin>, PacketCodec>;
type BoxedWriter = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, PacketCodec>;

/// Direction of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionDirection {
    /// We initiated the connection.
    Outbound,
    /// Peer connected to us.
    Inbound,
}

impl fmt::Display for ConnectionDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionDirection::Outbound => write!(f, "outbound"),
            ConnectionDirection::Inbound => write!(f, "inbound"),
        }
    }
}

/// Events a peer reports to the node's main loop.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// The peer announced its descriptor and is now registered.
    NewPeer {
        /// The registered peer.
        peer: Peer,
    },
    /// The peer shared the addresses it is connected to.
    PeerList {
        /// Remote address of the sender.
        from: SocketAddr,
        /// Advertised addresses of the sender's peers.
        addrs: Vec<SocketAddr>,
    },
    /// The peer was torn down.
    Disconnected {
        /// Remote address of the peer.
        addr: SocketAddr,
        /// Node id, when the descriptor had been learned.
        node_id: Option<NodeId>,
    },
}

struct PeerShared {
    ctx: Arc<ClusterContext>,
    addr: SocketAddr,
    direction: ConnectionDirection,
    state: Mutex<PeerState>,
    last_heartbeat: Mutex<Instant>,
    descriptor: Mutex<Option<NodeDescriptor>>,
    /// Transport held between connect/accept and start.
    pending: Mutex<Option<TlsStream<TcpStream>>>,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    replies: ReplyTable,
    cancel: watch::Sender<bool>,
}

/// One remote node connection.
///
/// Cheap to clone; all clones share the same connection state. A peer is
/// created by an outbound dial or an inbound accept, started once, and torn
/// down exactly once by [`Peer::disconnect`].
#[derive(Clone)]
pub struct Peer {
    shared: Arc<PeerShared>,
}

impl Peer {
    fn new(ctx: Arc<ClusterContext>, addr: SocketAddr, direction: ConnectionDirection) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            shared: Arc::new(PeerShared {
                ctx,
                addr,
                direction,
                state: Mutex::new(PeerState::Disconnected),
                last_heartbeat: Mutex::new(Instant::now()),
                descriptor: Mutex::new(None),
                pending: Mutex::new(None),
                writer: tokio::sync::Mutex::new(None),
                replies: ReplyTable::new(),
                cancel,
            }),
        }
    }

    /// Create a peer to be dialed with [`Peer::connect`].
    pub(crate) fn outbound(ctx: Arc<ClusterContext>, addr: SocketAddr) -> Self {
        Self::new(ctx, addr, ConnectionDirection::Outbound)
    }

    /// Create a peer from an accepted, handshake-complete TLS stream.
    pub(crate) fn inbound(
        ctx: Arc<ClusterContext>,
        addr: SocketAddr,
        stream: TlsStream<TcpStream>,
    ) -> Self {
        let peer = Self::new(ctx, addr, ConnectionDirection::Inbound);
        *peer.shared.pending.lock().unwrap_or_else(|e| e.into_inner()) = Some(stream);
        peer.set_state(PeerState::Handshake);
        peer
    }

    /// Remote address of this peer.
    pub fn addr(&self) -> SocketAddr {
        self.shared.addr
    }

    /// Direction of the connection.
    pub fn direction(&self) -> ConnectionDirection {
        self.shared.direction
    }

    /// Current connection state.
    pub fn state(&self) -> PeerState {
        *self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The peer's membership descriptor, once learned.
    pub fn descriptor(&self) -> Option<NodeDescriptor> {
        *self
            .shared
            .descriptor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Check whether the two handles refer to the same connection.
    pub fn same_connection(&self, other: &Peer) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    fn set_state(&self, state: PeerState) {
        *self.shared.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn touch_heartbeat(&self) {
        *self
            .shared
            .last_heartbeat
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    fn heartbeat_silence(&self) -> Duration {
        self.shared
            .last_heartbeat
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }

    /// Dial the remote address and complete the mutual-TLS handshake.
    ///
    /// Valid only from the disconnected state. On success the peer holds
    /// the open stream and is ready for [`Peer::start`].
    pub async fn connect(&self) -> ClusterResult<()> {
        {
            let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            if !state.is_disconnected() {
                return Err(ClusterError::NotReady {
                    expected: PeerState::Disconnected,
                    found: *state,
                });
            }
            *state = PeerState::Connecting;
        }

        let config = &self.shared.ctx.config;
        match self
            .shared
            .ctx
            .tls
            .connect(self.shared.addr, config.connect_timeout)
            .await
        {
            Ok(stream) => {
                *self.shared.pending.lock().unwrap_or_else(|e| e.into_inner()) = Some(stream);
                self.set_state(PeerState::Handshake);
                Ok(())
            }
            Err(e) => {
                tracing::debug!(addr = %self.shared.addr, error = %e, "Connect failed");
                self.set_state(PeerState::Disconnected);
                Err(e)
            }
        }
    }

    /// Start the protocol session on the handshake-complete transport.
    ///
    /// Valid only from the handshake state. Installs the framed codecs,
    /// spawns the heartbeat and receive loops, and pushes this node's
    /// descriptor and current peerlist to the new peer.
    pub async fn start(&self) -> ClusterResult<()> {
        let stream = {
            let state = self.state();
            if state != PeerState::Handshake {
                return Err(ClusterError::NotReady {
                    expected: PeerState::Handshake,
                    found: state,
                });
            }
            self.shared
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take()
                .ok_or(ClusterError::NotConnected)?
        };

        self.start_with_stream(stream).await
    }

    /// Install codecs over `stream` and bring the session up.
    ///
    /// Split out from [`Peer::start`] so tests can drive a peer over an
    /// in-memory stream.
    pub(crate) async fn start_with_stream<S>(&self, stream: S) -> ClusterResult<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        // Subscribe before going live so a racing disconnect is never missed.
        let heartbeat_cancel = self.shared.cancel.subscribe();
        let receive_cancel = self.shared.cancel.subscribe();

        let (read_half, write_half) = tokio::io::split(stream);
        let reader: BoxedReader = FramedRead::new(Box::new(read_half), PacketCodec::new());
        let writer: BoxedWriter = FramedWrite::new(Box::new(write_half), PacketCodec::new());

        *self.shared.writer.lock().await = Some(writer);

        {
            let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.is_disconnected() {
                // Torn down while starting; the writer was (or will be)
                // closed by the disconnect path.
                return Err(ClusterError::Disconnected);
            }
            *state = PeerState::Connected;
        }
        self.touch_heartbeat();

        tracing::info!(
            addr = %self.shared.addr,
            direction = %self.shared.direction,
            "Peer connected"
        );

        // Initial gossip push: who we are, who we know. Sent before the
        // loops start so the distribution packet is always first on the
        // wire.
        self.send_packet(Packet::distribution(&self.shared.ctx.local)?)
            .await?;
        let known = self.shared.ctx.registry.advertised_addrs();
        self.send_packet(Packet::peerlist(&known)?).await?;

        tokio::spawn(heartbeat_loop(self.clone(), heartbeat_cancel));
        tokio::spawn(receive_loop(self.clone(), reader, receive_cancel));

        Ok(())
    }

    /// Tear the connection down.
    ///
    /// Acts once: repeated calls (from the heartbeat loop, the receive
    /// loop, or the node) are no-ops after the first. Closes the transport,
    /// cancels both loops, fails all outstanding replies, and removes the
    /// registry and ring entries learned from this peer.
    pub async fn disconnect(&self) {
        let previous = {
            let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.is_disconnected() {
                return;
            }
            let previous = *state;
            *state = PeerState::Disconnected;
            previous
        };

        self.shared.cancel.send_replace(true);

        if let Some(mut writer) = self.shared.writer.lock().await.take() {
            let _ = writer.close().await;
        }
        *self.shared.pending.lock().unwrap_or_else(|e| e.into_inner()) = None;

        self.shared.replies.fail_all();

        let node_id = self.descriptor().map(|d| d.id);
        if let Some(id) = node_id {
            // Only clean up if the registry still maps the id to this
            // connection; a reconnected peer may have replaced us.
            if self.shared.ctx.registry.remove(&id, self) {
                if let Err(e) = self.shared.ctx.ring.deregister_node(&id) {
                    tracing::debug!(node = %id, error = %e, "Ring deregistration skipped");
                }
            }
        }

        tracing::info!(
            addr = %self.shared.addr,
            previous = %previous,
            "Peer disconnected"
        );

        let event = PeerEvent::Disconnected {
            addr: self.shared.addr,
            node_id,
        };
        if let Err(e) = self.shared.ctx.events.try_send(event) {
            tracing::debug!(error = %e, "Dropped disconnect event");
        }
    }

    /// Send a packet on the calling task.
    ///
    /// Fails with [`ClusterError::NotConnected`] when the transport is
    /// gone; transport write errors are returned to the caller, who is
    /// responsible for disconnecting.
    pub async fn send_packet(&self, packet: Packet) -> ClusterResult<()> {
        let mut guard = self.shared.writer.lock().await;
        let writer = guard.as_mut().ok_or(ClusterError::NotConnected)?;
        writer.send(packet).await
    }

    /// Send a request and block until its reply arrives or `timeout`
    /// expires.
    ///
    /// The reply is matched by correlation id; unrelated replies arriving
    /// first are routed to their own waiters. On timeout the slot is
    /// removed so a late reply is dropped as unsolicited. A disconnect
    /// while waiting fails the call with [`ClusterError::Disconnected`].
    pub async fn send_packet_wait_reply(
        &self,
        packet: Packet,
        timeout: Duration,
    ) -> ClusterResult<Packet> {
        let id = packet.id;
        let rx = self.shared.replies.register(id);

        if let Err(e) = self.send_packet(packet).await {
            self.shared.replies.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => {
                tracing::debug!(addr = %self.shared.addr, request = %id, reply = %reply.id, "Got reply");
                Ok(reply)
            }
            Ok(Err(_)) => Err(ClusterError::Disconnected),
            Err(_) => {
                self.shared.replies.remove(&id);
                Err(ClusterError::ReplyTimeout)
            }
        }
    }

    /// Store a value on this peer.
    pub async fn remote_set(
        &self,
        key: &str,
        value: Vec<u8>,
        flags: u32,
        expires_at: u64,
    ) -> ClusterResult<()> {
        let request = Packet::kv_request(&KvPacket::set(key, value, flags, expires_at))?;
        let reply = self
            .send_packet_wait_reply(request, self.shared.ctx.config.reply_timeout)
            .await?;
        reply.decode_kv_reply()?;
        Ok(())
    }

    /// Fetch a value from this peer.
    pub async fn remote_get(&self, key: &str) -> ClusterResult<Option<(Vec<u8>, u32)>> {
        let request = Packet::kv_request(&KvPacket::get(key))?;
        let reply = self
            .send_packet_wait_reply(request, self.shared.ctx.config.reply_timeout)
            .await?;
        let (found, kv) = reply.decode_kv_reply()?;
        Ok(found.then_some((kv.value, kv.flags)))
    }

    /// Delete a value on this peer. Returns whether the key existed.
    pub async fn remote_delete(&self, key: &str) -> ClusterResult<bool> {
        let request = Packet::kv_request(&KvPacket::delete(key))?;
        let reply = self
            .send_packet_wait_reply(request, self.shared.ctx.config.reply_timeout)
            .await?;
        let (found, _) = reply.decode_kv_reply()?;
        Ok(found)
    }

    /// Handle one decoded inbound packet.
    async fn dispatch(&self, packet: Packet) -> ClusterResult<()> {
        let cmd = packet.decode()?;

        match cmd {
            Command::Heartbeat => {
                tracing::trace!(addr = %self.shared.addr, "Heartbeat");
                self.touch_heartbeat();
            }
            Command::Distribution(descriptor) => {
                self.handle_distribution(descriptor).await;
            }
            Command::PeerList(addrs) => {
                tracing::debug!(
                    addr = %self.shared.addr,
                    count = addrs.len(),
                    "Peerlist received"
                );
                let event = PeerEvent::PeerList {
                    from: self.shared.addr,
                    addrs,
                };
                if let Err(e) = self.shared.ctx.events.send(event).await {
                    tracing::debug!(error = %e, "Dropped peerlist event");
                }
            }
            Command::KvRequest(kv) => {
                self.handle_kv_request(packet.id, kv).await?;
            }
            Command::KvAck(_) | Command::KvNotFound(_) => {
                if !self.shared.replies.complete(packet) {
                    tracing::warn!(addr = %self.shared.addr, "Unsolicited reply dropped");
                }
            }
            Command::Unknown(code) => {
                tracing::warn!(addr = %self.shared.addr, command = code, "Unknown packet command");
            }
        }

        Ok(())
    }

    async fn handle_distribution(&self, descriptor: NodeDescriptor) {
        tracing::debug!(addr = %self.shared.addr, node = %descriptor, "Distribution received");

        *self
            .shared
            .descriptor
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(descriptor);

        self.shared.ctx.registry.insert(descriptor, self.clone());

        if let Err(e) = self.shared.ctx.ring.register_node(descriptor) {
            tracing::warn!(node = %descriptor.id, error = %e, "Ring registration failed");
        }

        let event = PeerEvent::NewPeer { peer: self.clone() };
        if let Err(e) = self.shared.ctx.events.send(event).await {
            tracing::debug!(error = %e, "Dropped new-peer event");
        }
    }

    async fn handle_kv_request(&self, request_id: PacketId, kv: KvPacket) -> ClusterResult<()> {
        let store = &self.shared.ctx.store;

        let reply = match kv.command {
            KvCommand::Set => {
                tracing::debug!(addr = %self.shared.addr, key = %kv.key, "KV set");
                store.set(&kv.key, kv.value, kv.flags, kv.expires_at);
                Packet::kv_reply(
                    command::KV_ACK,
                    request_id,
                    &KvPacket::echo(KvCommand::Set, &kv.key),
                )?
            }
            KvCommand::Get => match store.get(&kv.key) {
                Some((value, flags)) => {
                    tracing::debug!(addr = %self.shared.addr, key = %kv.key, "KV get hit");
                    Packet::kv_reply(
                        command::KV_ACK,
                        request_id,
                        &KvPacket {
                            command: KvCommand::Get,
                            key: kv.key,
                            value,
                            flags,
                            expires_at: 0,
                        },
                    )?
                }
                None => {
                    tracing::debug!(addr = %self.shared.addr, key = %kv.key, "KV get miss");
                    Packet::kv_reply(
                        command::KV_NOT_FOUND,
                        request_id,
                        &KvPacket::echo(KvCommand::Get, &kv.key),
                    )?
                }
            },
            KvCommand::Delete => {
                let found = store.delete(&kv.key);
                tracing::debug!(addr = %self.shared.addr, key = %kv.key, found, "KV delete");
                let code = if found {
                    command::KV_ACK
                } else {
                    command::KV_NOT_FOUND
                };
                Packet::kv_reply(code, request_id, &KvPacket::echo(KvCommand::Delete, &kv.key))?
            }
        };

        self.send_packet(reply).await
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("addr", &self.shared.addr)
            .field("direction", &self.shared.direction)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Failure detector: ticks once per heartbeat interval.
///
/// Each tick evaluates heartbeat silence first, then acts on the state:
/// silence past the hard threshold kills a suspected peer, silence past the
/// soft threshold escalates to defib (once per qualifying gap), and a
/// heartbeat observed during defib restores the connected state. Only
/// connected peers send heartbeats.
async fn heartbeat_loop(peer: Peer, mut cancel: watch::Receiver<bool>) {
    let config = peer.shared.ctx.config.clone();
    let mut ticker = tokio::time::interval(config.heartbeat_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    enum Tick {
        SendHeartbeat,
        Dead,
        Idle,
        Exit,
    }

    loop {
        tokio::select! {
            _ = cancel.changed() => return,
            _ = ticker.tick() => {}
        }

        let silence = peer.heartbeat_silence();

        let action = {
            let mut state = peer.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            match *state {
                PeerState::Connected if silence >= config.defib_after => {
                    tracing::warn!(
                        addr = %peer.shared.addr,
                        silence = ?silence,
                        "Peer defib: no heartbeat response"
                    );
                    *state = PeerState::Defib;
                    Tick::Idle
                }
                PeerState::Connected => Tick::SendHeartbeat,
                PeerState::Defib if silence >= config.dead_after => Tick::Dead,
                PeerState::Defib if silence < config.defib_after => {
                    tracing::info!(addr = %peer.shared.addr, "Peer recovered from defib");
                    *state = PeerState::Connected;
                    Tick::SendHeartbeat
                }
                PeerState::Defib => Tick::Idle,
                _ => Tick::Exit,
            }
        };

        match action {
            Tick::SendHeartbeat => {
                if let Err(e) = peer.send_packet(Packet::heartbeat()).await {
                    tracing::error!(
                        addr = %peer.shared.addr,
                        error = %e,
                        "Heartbeat send failed, disconnecting"
                    );
                    peer.disconnect().await;
                    return;
                }
            }
            Tick::Dead => {
                tracing::warn!(
                    addr = %peer.shared.addr,
                    silence = ?silence,
                    "Peer dead: defib exceeded, disconnecting"
                );
                peer.disconnect().await;
                return;
            }
            Tick::Idle => {}
            Tick::Exit => return,
        }
    }
}

/// Receive loop: decodes frames until EOF, a decode error, or cancellation,
/// then disconnects the peer.
async fn receive_loop(peer: Peer, mut reader: BoxedReader, mut cancel: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = cancel.changed() => break,
            frame = reader.next() => match frame {
                None => {
                    tracing::debug!(addr = %peer.shared.addr, "Peer closed connection");
                    break;
                }
                Some(Err(e)) => {
                    tracing::error!(addr = %peer.shared.addr, error = %e, "Read error");
                    break;
                }
                Some(Ok(packet)) => {
                    if let Err(e) = peer.dispatch(packet).await {
                        tracing::error!(
                            addr = %peer.shared.addr,
                            error = %e,
                            "Dispatch failed, disconnecting"
                        );
                        break;
                    }
                }
            }
        }
    }

    peer.disconnect().await;
}
