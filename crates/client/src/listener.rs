//! Event listener: registration handshake, background pump and teardown.
//!
//! A listener owns its own [`Transport`]. Registration runs in the caller's
//! task; once every event is confirmed a pump task takes the transport over,
//! forwards event messages into a bounded channel and, when stopped or
//! cancelled, unregisters and closes the connection before exiting.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use vici_protocol::{Message, Packet, PacketType, ProtocolError};

use crate::error::{Error, Result};
use crate::options::SessionOptions;
use crate::transport::Transport;

/// Lifecycle of an event listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Pump running, events flowing.
    Streaming,
    /// Unregistering and closing the connection.
    Closing,
    /// Torn down after a stop or cancellation.
    Closed,
    /// Torn down after an I/O or protocol failure.
    Failed,
}

struct State {
    phase: ListenerState,
    terminal: Option<Error>,
}

/// State shared between the pump and the consumers of `next_event`.
struct Shared {
    events: tokio::sync::Mutex<mpsc::Receiver<Message>>,
    /// Caller-owned cancellation.
    ctx: CancellationToken,
    /// Internal stop signal; a child of the session's close token.
    stop: CancellationToken,
    state: Mutex<State>,
    drain_on_close: bool,
}

impl Shared {
    fn set_phase(&self, phase: ListenerState) {
        self.state.lock().phase = phase;
    }

    /// Record the pump's exit. A terminal error already handed to a consumer
    /// wins over the pump's own reason.
    fn finish(&self, terminal: Error) -> Error {
        let mut state = self.state.lock();
        let terminal = state.terminal.get_or_insert(terminal).clone();
        state.phase = if terminal.is_fatal() {
            ListenerState::Failed
        } else {
            ListenerState::Closed
        };
        terminal
    }

    /// The recorded terminal error, recording `fallback` if there is none yet.
    fn terminal_or(&self, fallback: Error) -> Error {
        self.state.lock().terminal.get_or_insert(fallback).clone()
    }

    /// The error to report right away when buffered events are discarded.
    fn stopped_error(&self) -> Option<Error> {
        if self.stop.is_cancelled() {
            return Some(self.terminal_or(Error::ListenerClosed));
        }
        if self.ctx.is_cancelled() {
            return Some(self.terminal_or(Error::Cancelled));
        }
        None
    }
}

/// Caller-side handle for pulling events, detached from the session's lock.
#[derive(Clone)]
pub(crate) struct EventReceiver {
    shared: Arc<Shared>,
}

impl EventReceiver {
    /// Wait for the next event or the listener's terminal error.
    pub(crate) async fn next(&self) -> Result<Message> {
        let shared = &self.shared;

        if shared.drain_on_close {
            let mut events = shared.events.lock().await;
            return match events.recv().await {
                Some(msg) => Ok(msg),
                None => Err(shared.terminal_or(Error::ListenerClosed)),
            };
        }

        if let Some(err) = shared.stopped_error() {
            return Err(err);
        }
        let mut events = shared.events.lock().await;
        if let Some(err) = shared.stopped_error() {
            return Err(err);
        }

        tokio::select! {
            biased;
            () = shared.stop.cancelled() => Err(shared.terminal_or(Error::ListenerClosed)),
            () = shared.ctx.cancelled() => Err(shared.terminal_or(Error::Cancelled)),
            msg = events.recv() => msg.ok_or_else(|| shared.terminal_or(Error::ListenerClosed)),
        }
    }
}

/// A registered listener and its pump task.
pub(crate) struct EventListener {
    shared: Arc<Shared>,
    task: Option<JoinHandle<()>>,
}

impl EventListener {
    /// Register `events` over `transport` and start the pump.
    ///
    /// On an unknown event, already confirmed events are unregistered before
    /// the error is returned. Cancellation of `ctx` or `stop` during the
    /// handshake rolls back the same way.
    pub(crate) async fn start(
        ctx: CancellationToken,
        stop: CancellationToken,
        mut transport: Transport,
        events: Vec<String>,
        options: &SessionOptions,
    ) -> Result<Self> {
        let mut registered: Vec<String> = Vec::with_capacity(events.len());
        let mut early = VecDeque::new();

        for event in &events {
            if registered.contains(event) {
                continue;
            }
            match register(&ctx, &stop, &mut transport, event, &mut early).await {
                Ok(()) => {
                    debug!(event = %event, "Registered event");
                    registered.push(event.clone());
                }
                Err(err) => {
                    if !err.is_fatal() {
                        // The daemon may have accepted a registration whose
                        // confirmation we stopped waiting for.
                        if matches!(err, Error::Cancelled | Error::ListenerClosed) {
                            registered.push(event.clone());
                        }
                        unregister_all(&mut transport, &registered, options.unregister_timeout())
                            .await;
                    }
                    if let Err(e) = transport.close().await {
                        debug!(error = %e, "Failed to close listener connection");
                    }
                    return Err(err);
                }
            }
        }

        let (tx, rx) = mpsc::channel(options.channel_capacity());
        let shared = Arc::new(Shared {
            events: tokio::sync::Mutex::new(rx),
            ctx,
            stop,
            state: Mutex::new(State {
                phase: ListenerState::Streaming,
                terminal: None,
            }),
            drain_on_close: options.drain_on_close,
        });

        let task = tokio::spawn(pump(
            transport,
            registered,
            early,
            tx,
            Arc::clone(&shared),
            options.unregister_timeout(),
        ));

        debug!(events = ?events, "Event listener started");
        Ok(Self {
            shared,
            task: Some(task),
        })
    }

    pub(crate) fn receiver(&self) -> EventReceiver {
        EventReceiver {
            shared: Arc::clone(&self.shared),
        }
    }

    pub(crate) fn state(&self) -> ListenerState {
        self.shared.state.lock().phase
    }

    /// Whether the pump task is still alive.
    pub(crate) fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Signal the pump to tear down and wait for it to exit.
    pub(crate) async fn stop(&mut self) {
        self.shared.stop.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Event listener task did not exit cleanly");
            }
        }
    }
}

impl Drop for EventListener {
    fn drop(&mut self) {
        // The pump tears down on its own once signalled
        self.shared.stop.cancel();
    }
}

/// Why the pump loop ended.
enum Exit {
    Stopped,
    Cancelled,
    ReceiverGone,
    Failed(Error),
}

async fn pump(
    mut transport: Transport,
    registered: Vec<String>,
    early: VecDeque<Message>,
    tx: mpsc::Sender<Message>,
    shared: Arc<Shared>,
    unregister_timeout: Duration,
) {
    let exit = stream_events(&mut transport, early, &tx, &shared).await;
    shared.set_phase(ListenerState::Closing);

    let terminal = match exit {
        Exit::Stopped | Exit::ReceiverGone => Error::ListenerClosed,
        Exit::Cancelled => Error::Cancelled,
        Exit::Failed(err) => {
            warn!(error = %err, "Event listener failed");
            err
        }
    };

    // A failed connection cannot carry the unregister handshake
    if !terminal.is_fatal() {
        unregister_all(&mut transport, &registered, unregister_timeout).await;
    }
    if let Err(e) = transport.close().await {
        debug!(error = %e, "Failed to close listener connection");
    }

    let terminal = shared.finish(terminal);
    debug!(reason = %terminal, "Event listener stopped");
    // Dropping the only sender closes the delivery channel
    drop(tx);
}

async fn stream_events(
    transport: &mut Transport,
    early: VecDeque<Message>,
    tx: &mpsc::Sender<Message>,
    shared: &Shared,
) -> Exit {
    for msg in early {
        if let Some(exit) = deliver(tx, shared, msg).await {
            return exit;
        }
    }

    loop {
        let received = tokio::select! {
            biased;
            () = shared.stop.cancelled() => return Exit::Stopped,
            () = shared.ctx.cancelled() => return Exit::Cancelled,
            received = transport.recv() => received,
        };

        match received {
            Ok(packet) if packet.packet_type() == PacketType::Event => {
                trace!(event = packet.name(), "Delivering event");
                if let Some(exit) = deliver(tx, shared, packet.into_message()).await {
                    return exit;
                }
            }
            Ok(packet) => {
                return Exit::Failed(ProtocolError::UnexpectedPacket(packet.packet_type()).into());
            }
            Err(err) => return Exit::Failed(err),
        }
    }
}

/// Hand one message to the consumer, waiting for room if the channel is full.
async fn deliver(tx: &mpsc::Sender<Message>, shared: &Shared, msg: Message) -> Option<Exit> {
    match tx.try_send(msg) {
        Ok(()) => None,
        Err(TrySendError::Closed(_)) => Some(Exit::ReceiverGone),
        Err(TrySendError::Full(msg)) => {
            trace!("Delivery channel full, waiting for consumer");
            tokio::select! {
                biased;
                () = shared.stop.cancelled() => Some(Exit::Stopped),
                () = shared.ctx.cancelled() => Some(Exit::Cancelled),
                sent = tx.send(msg) => sent.err().map(|_| Exit::ReceiverGone),
            }
        }
    }
}

/// Register one event, keeping events that arrive before the confirmation.
async fn register(
    ctx: &CancellationToken,
    stop: &CancellationToken,
    transport: &mut Transport,
    event: &str,
    early: &mut VecDeque<Message>,
) -> Result<()> {
    if stop.is_cancelled() {
        return Err(Error::ListenerClosed);
    }
    if ctx.is_cancelled() {
        return Err(Error::Cancelled);
    }

    transport.send(&Packet::event_register(event)).await?;

    // Only the receive is raced: recv is cancel safe, send is not
    tokio::select! {
        biased;
        () = stop.cancelled() => Err(Error::ListenerClosed),
        () = ctx.cancelled() => Err(Error::Cancelled),
        acked = await_event_ack(transport, event, |msg| early.push_back(msg)) => acked,
    }
}

/// Wait for the confirmation of a register or unregister request.
///
/// Event packets that arrive in between are passed to `on_event`.
pub(crate) async fn await_event_ack(
    transport: &mut Transport,
    event: &str,
    mut on_event: impl FnMut(Message),
) -> Result<()> {
    loop {
        let packet = transport.recv().await?;
        match packet.packet_type() {
            PacketType::EventConfirm => return Ok(()),
            PacketType::EventUnknown => return Err(Error::UnknownEvent(event.to_string())),
            PacketType::Event => on_event(packet.into_message()),
            other => return Err(ProtocolError::UnexpectedPacket(other).into()),
        }
    }
}

/// Best-effort unregistration, bounded by `timeout`. Failures are logged.
async fn unregister_all(transport: &mut Transport, events: &[String], timeout: Duration) {
    if events.is_empty() {
        return;
    }

    let handshake = async {
        for event in events {
            transport.send(&Packet::event_unregister(event.as_str())).await?;
            match await_event_ack(transport, event, |_| {}).await {
                Ok(()) => debug!(event = %event, "Unregistered event"),
                Err(Error::UnknownEvent(_)) => {
                    debug!(event = %event, "Daemon had no registration to remove");
                }
                Err(e) => return Err(e),
            }
        }
        Ok::<(), Error>(())
    };

    match tokio::time::timeout(timeout, handshake).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Failed to unregister events"),
        Err(_) => warn!(timeout = ?timeout, "Timed out unregistering events"),
    }
}
