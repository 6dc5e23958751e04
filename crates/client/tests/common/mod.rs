//! In-memory daemon for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};
use vici::{FramedMessage, Message, Packet, PacketType, Stream, Transport};

/// Events the mock daemon accepts registrations for.
pub const KNOWN_EVENTS: &[&str] = &["test-event", "log", "control-log"];

#[derive(Default)]
struct Inner {
    received: Mutex<Vec<Packet>>,
    burst: usize,
}

/// Answers commands from a fixed table and emits events after registration.
///
/// Every connection handed out by [`MockDaemon::connect`] is served by its
/// own task; all of them record into the same packet log.
#[derive(Clone, Default)]
pub struct MockDaemon {
    inner: Arc<Inner>,
}

impl MockDaemon {
    pub fn new() -> Self {
        Self::with_burst(1)
    }

    /// Emit `burst` numbered events after each `test-event` registration.
    pub fn with_burst(burst: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                received: Mutex::new(Vec::new()),
                burst,
            }),
        }
    }

    /// Open a new connection to the daemon.
    pub fn connect(&self) -> DuplexStream {
        let (client, server) = duplex(64 * 1024);
        self.accept(server);
        client
    }

    /// Serve an accepted connection on its own task.
    pub fn accept(&self, stream: impl Stream + 'static) {
        tokio::spawn(self.clone().serve(Transport::new(stream)));
    }

    /// Every packet received so far, across connections.
    pub fn received(&self) -> Vec<Packet> {
        self.inner.received.lock().clone()
    }

    /// Names of the received packets of one type.
    pub fn names_of(&self, ptype: PacketType) -> Vec<String> {
        self.received()
            .into_iter()
            .filter(|p| p.packet_type() == ptype)
            .map(|p| p.name().to_string())
            .collect()
    }

    async fn serve(self, mut transport: Transport) {
        let mut registered: Vec<String> = Vec::new();

        while let Ok(packet) = transport.recv().await {
            self.inner.received.lock().push(packet.clone());

            let replies = self.respond(&packet, &mut registered);
            for reply in replies {
                if transport.send(&reply).await.is_err() {
                    return;
                }
            }
        }
    }

    fn respond(&self, packet: &Packet, registered: &mut Vec<String>) -> Vec<Packet> {
        let name = packet.name();
        match packet.packet_type() {
            PacketType::EventRegister if KNOWN_EVENTS.contains(&name) => {
                registered.push(name.to_string());
                let mut replies = vec![Packet::new(PacketType::EventConfirm, "", None)];
                if name == "test-event" {
                    replies.extend((0..self.inner.burst).map(|seq| Packet::event(name, hello(seq))));
                }
                replies
            }
            PacketType::EventUnregister if registered.iter().any(|r| r == name) => {
                registered.retain(|r| r != name);
                vec![Packet::new(PacketType::EventConfirm, "", None)]
            }
            PacketType::EventRegister | PacketType::EventUnregister => {
                vec![Packet::new(PacketType::EventUnknown, "", None)]
            }
            PacketType::CmdRequest => self.command(name, packet.message(), registered),
            _ => Vec::new(),
        }
    }

    fn command(&self, name: &str, request: Option<&Message>, registered: &[String]) -> Vec<Packet> {
        match name {
            "version" => vec![Packet::command_response(
                Message::new()
                    .with("daemon", "charon")
                    .and_then(|m| m.with("version", "5.9.14"))
                    .and_then(|m| m.with("sysname", "Linux"))
                    .unwrap(),
            )],
            "echo" => vec![Packet::command_response(request.cloned().unwrap_or_default())],
            "fail" => vec![Packet::command_response(
                Message::new()
                    .with("success", "no")
                    .and_then(|m| m.with("errmsg", "it failed"))
                    .unwrap(),
            )],
            "initiate" => {
                let mut replies = Vec::new();
                if registered.iter().any(|r| r == "control-log") {
                    replies.extend((0..3).map(|seq| {
                        let msg = Message::new()
                            .with("group", "IKE")
                            .and_then(|m| m.with("msg", format!("step {seq}")))
                            .unwrap();
                        Packet::event("control-log", msg)
                    }));
                }
                replies.push(Packet::command_response(
                    Message::new().with("success", "yes").unwrap(),
                ));
                replies
            }
            _ => vec![Packet::new(PacketType::CmdUnknown, "", None)],
        }
    }
}

/// Payload of the `test-event` events.
pub fn hello(seq: usize) -> Message {
    Message::new()
        .with("test", "hello world!")
        .and_then(|m| m.with("seq", seq.to_string()))
        .unwrap()
}

/// Read one frame from a raw stream and decode it.
pub async fn read_packet(raw: &mut DuplexStream) -> Packet {
    let mut header = [0u8; FramedMessage::HEADER_SIZE];
    raw.read_exact(&mut header).await.unwrap();
    let len = u32::from_be_bytes(header) as usize;
    let mut body = vec![0u8; len];
    raw.read_exact(&mut body).await.unwrap();
    Packet::decode(&body).unwrap()
}

/// Write one packet to a raw stream.
pub async fn write_packet(raw: &mut DuplexStream, packet: &Packet) {
    raw.write_all(&packet.to_frame().unwrap()).await.unwrap();
}
