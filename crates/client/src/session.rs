//! Client session: command requests and the event listener.
//!
//! A [`Session`] keeps one connection for commands and opens a second one
//! for its event listener, so command responses and event frames never share
//! a read loop.

use std::future::Future;
use std::io;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use vici_protocol::{Message, Packet, PacketType, ProtocolError};

use crate::error::{Error, Result};
use crate::listener::{EventListener, ListenerState, await_event_ack};
use crate::options::SessionOptions;
use crate::transport::{Stream, Transport};

/// Events collected by [`Session::streamed_command`] and the final response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamedResponse {
    /// Event messages received while the command ran, in arrival order.
    pub events: Vec<Message>,
    /// The command's response message.
    pub response: Message,
}

/// A connection to the daemon.
///
/// All methods take `&self`; commands are serialized on the command
/// connection and at most one event listener is active at a time.
pub struct Session {
    commands: Mutex<Option<Transport>>,
    listener: Mutex<Option<EventListener>>,
    /// Cancelled by `close` and on drop. Listener stop tokens are its children.
    closed: CancellationToken,
    options: SessionOptions,
}

impl Session {
    /// Connect to the daemon's Unix socket at `options.socket_path`.
    #[cfg(unix)]
    pub async fn connect(options: SessionOptions) -> Result<Self> {
        let stream = tokio::net::UnixStream::connect(&options.socket_path).await?;
        debug!(socket = %options.socket_path.display(), "Connected to daemon");
        Ok(Self::new(stream, options))
    }

    /// Build a session over an already connected stream.
    pub fn new(stream: impl Stream + 'static, options: SessionOptions) -> Self {
        let transport = Transport::new(stream).with_max_frame_size(options.max_frame_size);
        Self {
            commands: Mutex::new(Some(transport)),
            listener: Mutex::new(None),
            closed: CancellationToken::new(),
            options,
        }
    }

    #[must_use]
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Send a command request and wait for its response.
    ///
    /// A `success = no` reply is still returned as `Ok`; use
    /// [`Message::check_success`] to turn it into an error. After an I/O or
    /// protocol failure the command connection is closed and later calls
    /// return [`Error::SessionClosed`].
    pub async fn command(&self, name: &str, message: Message) -> Result<Message> {
        let mut guard = self.commands.lock().await;
        let transport = guard.as_mut().ok_or(Error::SessionClosed)?;

        debug!(command = name, "Sending command");
        let result = self.until_closed(exchange(transport, name, message)).await;
        self.settle(&mut guard, name, &result).await;
        result
    }

    /// Run a command that reports progress through `event`.
    ///
    /// Registers for `event` on the command connection, sends the request,
    /// collects every event until the response arrives and unregisters again.
    pub async fn streamed_command(
        &self,
        name: &str,
        event: &str,
        message: Message,
    ) -> Result<StreamedResponse> {
        let mut guard = self.commands.lock().await;
        let transport = guard.as_mut().ok_or(Error::SessionClosed)?;

        debug!(command = name, event, "Sending streamed command");
        let result = self
            .until_closed(streamed_exchange(transport, name, event, message))
            .await;
        self.settle(&mut guard, name, &result).await;
        result
    }

    /// Open a listener connection on the session's socket and register `events`.
    ///
    /// Cancelling `ctx` stops the listener; [`next_event`](Self::next_event)
    /// then reports [`Error::Cancelled`].
    #[cfg(unix)]
    pub async fn listen<I, S>(&self, ctx: CancellationToken, events: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.closed.is_cancelled() {
            return Err(Error::SessionClosed);
        }
        if self.is_listening().await {
            return Err(Error::ListenerActive);
        }
        let stream = tokio::net::UnixStream::connect(&self.options.socket_path).await?;
        self.listen_with(ctx, stream, events).await
    }

    /// Start a listener over an already connected stream.
    ///
    /// Fails with [`Error::ListenerActive`] while another listener runs, and
    /// with [`Error::UnknownEvent`] if the daemon rejects any event, in which
    /// case nothing stays registered.
    pub async fn listen_with<I, S>(
        &self,
        ctx: CancellationToken,
        stream: impl Stream + 'static,
        events: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.closed.is_cancelled() {
            return Err(Error::SessionClosed);
        }

        let mut slot = self.listener.lock().await;
        if slot.as_ref().is_some_and(EventListener::is_running) {
            return Err(Error::ListenerActive);
        }
        if let Some(mut previous) = slot.take() {
            previous.stop().await;
        }

        let events: Vec<String> = events.into_iter().map(Into::into).collect();
        let transport = Transport::new(stream).with_max_frame_size(self.options.max_frame_size);
        let listener = EventListener::start(
            ctx,
            self.closed.child_token(),
            transport,
            events,
            &self.options,
        )
        .await?;

        *slot = Some(listener);
        Ok(())
    }

    /// Wait for the next event from the active listener.
    ///
    /// Once the listener has stopped every call returns the same terminal
    /// error: [`Error::ListenerClosed`], [`Error::Cancelled`], or the failure
    /// that brought it down.
    pub async fn next_event(&self) -> Result<Message> {
        let receiver = {
            let slot = self.listener.lock().await;
            match slot.as_ref() {
                Some(listener) => listener.receiver(),
                None => return Err(Error::ListenerClosed),
            }
        };
        receiver.next().await
    }

    /// Stop the listener and wait until it has unregistered and closed.
    pub async fn stop_listening(&self) {
        let mut slot = self.listener.lock().await;
        if let Some(listener) = slot.as_mut() {
            listener.stop().await;
        }
    }

    pub async fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .await
            .as_ref()
            .is_some_and(EventListener::is_running)
    }

    /// State of the most recent listener, if one was started.
    pub async fn listener_state(&self) -> Option<ListenerState> {
        self.listener.lock().await.as_ref().map(EventListener::state)
    }

    /// Close the session. Stops the listener and waits for its teardown.
    ///
    /// A command in flight fails with an I/O error. Calling this again is a
    /// no-op.
    pub async fn close(&self) -> Result<()> {
        self.closed.cancel();

        self.stop_listening().await;

        let mut guard = self.commands.lock().await;
        match guard.take() {
            Some(mut transport) => {
                debug!("Closing session");
                transport.close().await
            }
            None => Ok(()),
        }
    }

    /// Race `fut` against session close.
    async fn until_closed<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "session closed",
            )
            .into()),
            result = fut => result,
        }
    }

    /// Drop the command connection after a failure that left it unusable.
    async fn settle<T>(&self, guard: &mut Option<Transport>, name: &str, result: &Result<T>) {
        let Err(err) = result else {
            return;
        };
        if !err.is_fatal() {
            return;
        }
        warn!(command = name, error = %err, "Command connection failed, closing it");
        if let Some(mut transport) = guard.take() {
            if let Err(e) = transport.close().await {
                debug!(error = %e, "Failed to close command connection");
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("options", &self.options)
            .field("closed", &self.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}

async fn exchange(transport: &mut Transport, name: &str, message: Message) -> Result<Message> {
    transport.send(&Packet::command_request(name, message)).await?;
    let packet = transport.recv().await?;
    match packet.packet_type() {
        PacketType::CmdResponse => Ok(packet.into_message()),
        PacketType::CmdUnknown => Err(Error::UnknownCommand(name.to_string())),
        other => Err(ProtocolError::UnexpectedPacket(other).into()),
    }
}

async fn streamed_exchange(
    transport: &mut Transport,
    name: &str,
    event: &str,
    message: Message,
) -> Result<StreamedResponse> {
    transport.send(&Packet::event_register(event)).await?;
    await_event_ack(transport, event, |_| {}).await?;

    transport.send(&Packet::command_request(name, message)).await?;

    let mut events = Vec::new();
    let response = loop {
        let packet = transport.recv().await?;
        match packet.packet_type() {
            PacketType::Event if packet.name() == event => events.push(packet.into_message()),
            PacketType::Event => trace!(event = packet.name(), "Ignoring unrelated event"),
            PacketType::CmdResponse => break Ok(packet.into_message()),
            PacketType::CmdUnknown => break Err(Error::UnknownCommand(name.to_string())),
            other => return Err(ProtocolError::UnexpectedPacket(other).into()),
        }
    };

    // Unregister even when the command was unknown
    transport.send(&Packet::event_unregister(event)).await?;
    await_event_ack(transport, event, |_| {}).await?;

    Ok(StreamedResponse {
        events,
        response: response?,
    })
}
