//! TCP transport for switch sessions.
//!
//! A connection is split into a reader task and a writer task. The reader
//! frames the byte stream, decodes each message with the configured codec and
//! feeds the session's inbound queue; the writer drains the session's outbound
//! queue. Neither task touches session state.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use ofc_wire::{FrameDecoder, Message, MessageCodec};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::controller::Controller;
use crate::session::{CloseReason, SessionConfig, SwitchSession};
use crate::timer::Timer;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Create a TCP listener bound to the given address
pub async fn listen_tcp(addr: SocketAddr) -> tokio::io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Connect to a TCP address
pub async fn connect_tcp(addr: SocketAddr) -> tokio::io::Result<TcpStream> {
    TcpStream::connect(addr).await
}

/// Everything a new connection needs besides the socket
#[derive(Clone, Debug)]
pub struct ConnectionContext {
    /// Codec used in both directions
    pub codec: Arc<dyn MessageCodec>,
    /// Per-session settings
    pub config: SessionConfig,
    /// Registry the session reports to
    pub controller: Arc<Controller>,
    /// Shared periodic task scheduler
    pub timer: Timer,
}

/// Start a session on an accepted (or dialled) TCP stream.
///
/// The returned handle resolves when the session ends; the socket tasks
/// stop on their own once it has.
pub fn spawn_connection(
    stream: TcpStream,
    ctx: &ConnectionContext,
) -> tokio::io::Result<(SwitchSession, JoinHandle<CloseReason>)> {
    let peer = stream.peer_addr()?;
    stream.set_nodelay(true)?;
    let (reader, writer) = stream.into_split();

    let (inbound_tx, inbound_rx) = mpsc::channel(ctx.config.inbound_queue.max(1));
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    let (session, handle) = SwitchSession::start(
        ctx.config.clone(),
        ctx.controller.clone(),
        ctx.timer.clone(),
        Some(peer),
        inbound_rx,
        outbound_tx,
    );

    let codec = ctx.codec.clone();
    tokio::spawn(async move {
        if let Err(e) = read_loop(reader, codec, inbound_tx, peer).await {
            warn!("Read from {} failed: {:#}", peer, e);
        }
    });

    let codec = ctx.codec.clone();
    let writer_session = session.clone();
    tokio::spawn(async move {
        if let Err(e) = write_loop(writer, codec, outbound_rx, peer).await {
            warn!("Write to {} failed: {:#}", peer, e);
            writer_session.close(CloseReason::TransportClosed);
        }
    });

    Ok((session, handle))
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    codec: Arc<dyn MessageCodec>,
    inbound: mpsc::Sender<Message>,
    peer: SocketAddr,
) -> anyhow::Result<()> {
    let mut decoder = FrameDecoder::new();
    let mut buffer = BytesMut::with_capacity(READ_BUFFER_SIZE);

    loop {
        // A bad length field desynchronises the stream for good
        while let Some(frame) = decoder.decode(&mut buffer)? {
            match codec.decode(frame) {
                Ok(msg) => {
                    trace!("Received {} from {} (xid: {})", msg.message_type(), peer, msg.xid);
                    if inbound.send(msg).await.is_err() {
                        return Ok(());
                    }
                }
                Err(e) => warn!("Dropping undecodable message from {}: {}", peer, e),
            }
        }

        let bytes_read = tokio::select! {
            _ = inbound.closed() => return Ok(()),
            read = reader.read_buf(&mut buffer) => read?,
        };
        if bytes_read == 0 {
            debug!("Connection closed by {}", peer);
            return Ok(());
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    codec: Arc<dyn MessageCodec>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    peer: SocketAddr,
) -> anyhow::Result<()> {
    while let Some(msg) = outbound.recv().await {
        let bytes = match codec.encode(&msg) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    "Failed to encode {} for {} (xid: {}): {}",
                    msg.message_type(),
                    peer,
                    msg.xid,
                    e
                );
                continue;
            }
        };
        writer.write_all(&bytes).await?;
        trace!("Sent {} to {} (xid: {})", msg.message_type(), peer, msg.xid);
    }

    writer.shutdown().await?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::handshake::HandshakeState;
    use bytes::Bytes;
    use ofc_wire::{
        Actions, Capabilities, FeaturesReply, MacAddress, MessageBody, MessageType,
        OpenFlowCodec, PhyPort,
    };
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;
    use tokio::time::timeout;

    /// Minimal switch speaking the protocol over a real socket
    pub(crate) struct FakeSwitch {
        stream: TcpStream,
        decoder: FrameDecoder,
        buffer: BytesMut,
        codec: OpenFlowCodec,
    }

    impl FakeSwitch {
        pub(crate) async fn connect(addr: SocketAddr) -> Self {
            Self::wrap(connect_tcp(addr).await.unwrap())
        }

        pub(crate) fn wrap(stream: TcpStream) -> Self {
            Self {
                stream,
                decoder: FrameDecoder::new(),
                buffer: BytesMut::new(),
                codec: OpenFlowCodec::new(),
            }
        }

        pub(crate) async fn send(&mut self, xid: u32, body: MessageBody) {
            let bytes = self.codec.encode(&Message::with_xid(xid, body)).unwrap();
            self.stream.write_all(&bytes).await.unwrap();
        }

        pub(crate) async fn send_raw(&mut self, bytes: &[u8]) {
            self.stream.write_all(bytes).await.unwrap();
        }

        pub(crate) async fn recv(&mut self) -> Option<Message> {
            loop {
                if let Some(frame) = self.decoder.decode(&mut self.buffer).unwrap() {
                    return Some(self.codec.decode(frame).unwrap());
                }
                if self.stream.read_buf(&mut self.buffer).await.unwrap() == 0 {
                    return None;
                }
            }
        }

        pub(crate) async fn expect(&mut self, typ: MessageType) -> Message {
            loop {
                let msg = timeout(Duration::from_secs(5), self.recv())
                    .await
                    .expect("timed out")
                    .expect("controller closed the connection");
                if msg.message_type() == typ {
                    return msg;
                }
            }
        }

        pub(crate) async fn handshake(&mut self, dpid: u64) {
            self.send(1, MessageBody::Hello).await;
            self.expect(MessageType::Hello).await;
            let request = self.expect(MessageType::FeaturesRequest).await;
            self.send(
                request.xid,
                MessageBody::FeaturesReply(FeaturesReply {
                    datapath_id: dpid,
                    n_buffers: 256,
                    n_tables: 1,
                    capabilities: Capabilities::FLOW_STATS,
                    actions: Actions::OUTPUT,
                    ports: vec![PhyPort::new(1, MacAddress::new([2, 0, 0, 0, 0, 1]), "p1")],
                }),
            )
            .await;
        }
    }

    async fn accept_one() -> (TcpListener, SocketAddr) {
        let listener = listen_tcp(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    fn context(controller: &Arc<Controller>) -> ConnectionContext {
        ConnectionContext {
            codec: Arc::new(OpenFlowCodec::new()),
            config: SessionConfig::default(),
            controller: controller.clone(),
            timer: Timer::new(),
        }
    }

    pub(crate) async fn wait_for<F: Fn() -> bool>(check: F) {
        timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn test_handshake_over_tcp() {
        let controller = Arc::new(Controller::new());
        let (listener, addr) = accept_one().await;
        let mut switch = FakeSwitch::connect(addr).await;
        let (stream, _) = listener.accept().await.unwrap();
        let (session, handle) = spawn_connection(stream, &context(&controller)).unwrap();

        switch.handshake(0xabc).await;
        wait_for(|| controller.switch(0xabc).is_some()).await;
        assert_eq!(session.state(), HandshakeState::Established);
        assert!(session.remote_addr().is_some());

        // Echo from the switch is answered with the same xid and payload
        switch
            .send(77, MessageBody::EchoRequest(Bytes::from_static(b"hi")))
            .await;
        let reply = switch.expect(MessageType::EchoReply).await;
        assert_eq!(reply.xid, 77);
        assert_eq!(reply.body, MessageBody::EchoReply(Bytes::from_static(b"hi")));

        drop(switch);
        let reason = timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert_eq!(reason, CloseReason::TransportClosed);
        assert!(controller.is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_message_is_skipped() {
        let controller = Arc::new(Controller::new());
        let (listener, addr) = accept_one().await;
        let mut switch = FakeSwitch::connect(addr).await;
        let (stream, _) = listener.accept().await.unwrap();
        let (session, _handle) = spawn_connection(stream, &context(&controller)).unwrap();

        // Well framed, unknown type
        switch.send_raw(&[0x01, 0x63, 0x00, 0x08, 0, 0, 0, 5]).await;
        switch.handshake(0x5).await;
        wait_for(|| session.is_handshaken()).await;
    }

    #[tokio::test]
    async fn test_session_close_shuts_socket() {
        let controller = Arc::new(Controller::new());
        let (listener, addr) = accept_one().await;
        let mut switch = FakeSwitch::connect(addr).await;
        let (stream, _) = listener.accept().await.unwrap();
        let (session, handle) = spawn_connection(stream, &context(&controller)).unwrap();

        switch.expect(MessageType::Hello).await;
        session.close(CloseReason::Requested);
        assert_eq!(handle.await.unwrap(), CloseReason::Requested);

        let eof = timeout(Duration::from_secs(5), async {
            while switch.recv().await.is_some() {}
        })
        .await;
        assert!(eof.is_ok(), "socket should reach EOF after close");
    }
}
