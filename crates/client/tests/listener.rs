//! Event listener tests against the in-memory daemon.

mod common;

use std::time::Duration;

use common::{MockDaemon, read_packet, write_packet};
use tokio::io::{AsyncWriteExt, duplex};
use vici::{
    CancellationToken, Error, FramedMessage, ListenerState, Message, Packet, PacketType,
    ProtocolError, Session, SessionOptions,
};

fn session_with(daemon: &MockDaemon, options: SessionOptions) -> Session {
    Session::new(daemon.connect(), options)
}

fn seq(event: &Message) -> usize {
    event.scalar("seq").unwrap().unwrap().parse().unwrap()
}

/// Poll until the listener task has exited.
async fn wait_stopped(session: &Session) {
    for _ in 0..200 {
        if !session.is_listening().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("listener did not stop");
}

#[tokio::test]
async fn test_listen_receives_event() {
    let daemon = MockDaemon::new();
    let session = session_with(&daemon, SessionOptions::default());

    session
        .listen_with(CancellationToken::new(), daemon.connect(), ["test-event"])
        .await
        .unwrap();
    assert!(session.is_listening().await);
    assert_eq!(session.listener_state().await, Some(ListenerState::Streaming));

    let event = session.next_event().await.unwrap();
    assert_eq!(event.scalar("test").unwrap(), Some("hello world!"));

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_next_event_without_listener() {
    let daemon = MockDaemon::new();
    let session = session_with(&daemon, SessionOptions::default());

    assert!(matches!(session.next_event().await, Err(Error::ListenerClosed)));
    assert_eq!(session.listener_state().await, None);
}

#[tokio::test]
async fn test_events_arrive_in_order() {
    let daemon = MockDaemon::with_burst(20);
    let options = SessionOptions::default().with_event_buffer(4);
    let session = session_with(&daemon, options);

    session
        .listen_with(CancellationToken::new(), daemon.connect(), ["test-event"])
        .await
        .unwrap();

    for expected in 0..20 {
        let event = session.next_event().await.unwrap();
        assert_eq!(seq(&event), expected);
    }
}

#[tokio::test]
async fn test_second_listener_is_rejected() {
    let daemon = MockDaemon::new();
    let session = session_with(&daemon, SessionOptions::default());

    session
        .listen_with(CancellationToken::new(), daemon.connect(), ["test-event"])
        .await
        .unwrap();

    assert!(matches!(
        session
            .listen_with(CancellationToken::new(), daemon.connect(), ["log"])
            .await,
        Err(Error::ListenerActive)
    ));
    assert_eq!(daemon.names_of(PacketType::EventRegister), ["test-event"]);
}

#[tokio::test]
async fn test_unknown_event_rolls_back() {
    let daemon = MockDaemon::new();
    let session = session_with(&daemon, SessionOptions::default());

    match session
        .listen_with(
            CancellationToken::new(),
            daemon.connect(),
            ["test-event", "not-an-event"],
        )
        .await
    {
        Err(Error::UnknownEvent(name)) => assert_eq!(name, "not-an-event"),
        other => panic!("expected UnknownEvent, got {other:?}"),
    }

    assert!(!session.is_listening().await);
    assert_eq!(daemon.names_of(PacketType::EventUnregister), ["test-event"]);

    // A later listen starts from scratch
    session
        .listen_with(CancellationToken::new(), daemon.connect(), ["test-event"])
        .await
        .unwrap();
    assert!(session.next_event().await.is_ok());
}

#[tokio::test]
async fn test_stop_listening_unregisters() {
    let daemon = MockDaemon::new();
    let session = session_with(&daemon, SessionOptions::default());

    session
        .listen_with(CancellationToken::new(), daemon.connect(), ["test-event", "log"])
        .await
        .unwrap();
    session.stop_listening().await;

    assert!(!session.is_listening().await);
    assert_eq!(session.listener_state().await, Some(ListenerState::Closed));
    assert_eq!(
        daemon.names_of(PacketType::EventUnregister),
        ["test-event", "log"]
    );

    // The terminal error is sticky
    assert!(matches!(session.next_event().await, Err(Error::ListenerClosed)));
    assert!(matches!(session.next_event().await, Err(Error::ListenerClosed)));

    // And a new listener may start
    session
        .listen_with(CancellationToken::new(), daemon.connect(), ["log"])
        .await
        .unwrap();
    assert!(session.is_listening().await);
}

#[tokio::test]
async fn test_cancel_stops_listener() {
    let daemon = MockDaemon::new();
    let session = session_with(&daemon, SessionOptions::default());
    let ctx = CancellationToken::new();

    session
        .listen_with(ctx.clone(), daemon.connect(), ["test-event"])
        .await
        .unwrap();
    ctx.cancel();

    assert!(matches!(session.next_event().await, Err(Error::Cancelled)));
    wait_stopped(&session).await;

    assert!(matches!(session.next_event().await, Err(Error::Cancelled)));
    assert_eq!(session.listener_state().await, Some(ListenerState::Closed));
    assert_eq!(daemon.names_of(PacketType::EventUnregister), ["test-event"]);
}

#[tokio::test]
async fn test_cancelled_stays_terminal_after_close() {
    let daemon = MockDaemon::new();
    let session = session_with(&daemon, SessionOptions::default());
    let ctx = CancellationToken::new();

    session
        .listen_with(ctx.clone(), daemon.connect(), ["test-event"])
        .await
        .unwrap();
    ctx.cancel();
    assert!(matches!(session.next_event().await, Err(Error::Cancelled)));

    // Closing afterwards must not change the reported reason
    session.close().await.unwrap();
    assert!(matches!(session.next_event().await, Err(Error::Cancelled)));
    assert!(matches!(session.next_event().await, Err(Error::Cancelled)));
    assert_eq!(session.listener_state().await, Some(ListenerState::Closed));
}

#[tokio::test]
async fn test_listener_closed_stays_terminal_after_cancel() {
    let daemon = MockDaemon::new();
    let session = session_with(&daemon, SessionOptions::default());
    let ctx = CancellationToken::new();

    session
        .listen_with(ctx.clone(), daemon.connect(), ["test-event"])
        .await
        .unwrap();
    session.stop_listening().await;
    assert!(matches!(session.next_event().await, Err(Error::ListenerClosed)));

    ctx.cancel();
    assert!(matches!(session.next_event().await, Err(Error::ListenerClosed)));
}

#[tokio::test]
async fn test_next_event_wakes_on_cancel() {
    let daemon = MockDaemon::with_burst(0);
    let session = session_with(&daemon, SessionOptions::default());
    let ctx = CancellationToken::new();

    session
        .listen_with(ctx.clone(), daemon.connect(), ["test-event"])
        .await
        .unwrap();

    let (result, ()) = tokio::join!(session.next_event(), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        ctx.cancel();
    });
    assert!(matches!(result, Err(Error::Cancelled)));
}

#[tokio::test]
async fn test_close_stops_listener() {
    let daemon = MockDaemon::new();
    let session = session_with(&daemon, SessionOptions::default());

    session
        .listen_with(CancellationToken::new(), daemon.connect(), ["test-event"])
        .await
        .unwrap();
    session.close().await.unwrap();

    assert!(!session.is_listening().await);
    assert!(matches!(session.next_event().await, Err(Error::ListenerClosed)));
    assert!(matches!(
        session
            .listen_with(CancellationToken::new(), daemon.connect(), ["test-event"])
            .await,
        Err(Error::SessionClosed)
    ));
}

#[tokio::test]
async fn test_events_during_registration_come_first() {
    let daemon = MockDaemon::with_burst(3);
    let session = session_with(&daemon, SessionOptions::default());

    // test-event fires while "log" is still being registered
    session
        .listen_with(CancellationToken::new(), daemon.connect(), ["test-event", "log"])
        .await
        .unwrap();

    for expected in 0..3 {
        assert_eq!(seq(&session.next_event().await.unwrap()), expected);
    }
}

#[tokio::test]
async fn test_stop_discards_buffered_events() {
    let daemon = MockDaemon::with_burst(5);
    let session = session_with(&daemon, SessionOptions::default());

    session
        .listen_with(CancellationToken::new(), daemon.connect(), ["test-event", "log"])
        .await
        .unwrap();
    session.stop_listening().await;

    assert!(matches!(session.next_event().await, Err(Error::ListenerClosed)));
}

#[tokio::test]
async fn test_stop_drains_buffered_events() {
    let daemon = MockDaemon::with_burst(5);
    let options = SessionOptions::default()
        .with_event_buffer(8)
        .with_drain_on_close(true);
    let session = session_with(&daemon, options);

    session
        .listen_with(CancellationToken::new(), daemon.connect(), ["test-event", "log"])
        .await
        .unwrap();
    session.stop_listening().await;

    for expected in 0..5 {
        assert_eq!(seq(&session.next_event().await.unwrap()), expected);
    }
    assert!(matches!(session.next_event().await, Err(Error::ListenerClosed)));
}

#[tokio::test]
async fn test_malformed_frame_is_fatal() {
    let daemon = MockDaemon::new();
    let session = session_with(&daemon, SessionOptions::default());
    let (client, mut raw) = duplex(1024);

    let (listened, ()) = tokio::join!(
        session.listen_with(CancellationToken::new(), client, ["test-event"]),
        async {
            let register = read_packet(&mut raw).await;
            assert_eq!(register.packet_type(), PacketType::EventRegister);
            write_packet(&mut raw, &Packet::new(PacketType::EventConfirm, "", None)).await;
        }
    );
    listened.unwrap();

    raw.write_all(&FramedMessage::frame(&[42]).unwrap()).await.unwrap();

    let err = session.next_event().await.unwrap_err();
    assert!(
        matches!(err, Error::Protocol(ProtocolError::UnknownPacketType(42))),
        "got {err:?}"
    );
    // Same error on every later call
    assert!(matches!(
        session.next_event().await,
        Err(Error::Protocol(ProtocolError::UnknownPacketType(42)))
    ));

    wait_stopped(&session).await;
    assert_eq!(session.listener_state().await, Some(ListenerState::Failed));
}

#[tokio::test]
async fn test_unexpected_packet_is_fatal() {
    let daemon = MockDaemon::new();
    let session = session_with(&daemon, SessionOptions::default());
    let (client, mut raw) = duplex(1024);

    let (listened, ()) = tokio::join!(
        session.listen_with(CancellationToken::new(), client, ["test-event"]),
        async {
            read_packet(&mut raw).await;
            write_packet(&mut raw, &Packet::new(PacketType::EventConfirm, "", None)).await;
        }
    );
    listened.unwrap();

    write_packet(&mut raw, &Packet::command_response(Message::new())).await;

    assert!(matches!(
        session.next_event().await,
        Err(Error::Protocol(ProtocolError::UnexpectedPacket(
            PacketType::CmdResponse
        )))
    ));
}

#[tokio::test]
async fn test_cancel_during_registration_rolls_back() {
    let daemon = MockDaemon::new();
    let options = SessionOptions::default().with_unregister_timeout(Duration::from_millis(200));
    let session = session_with(&daemon, options);
    let (client, mut raw) = duplex(1024);
    let ctx = CancellationToken::new();

    let (listened, unregister) = tokio::join!(
        session.listen_with(ctx.clone(), client, ["test-event"]),
        async {
            let register = read_packet(&mut raw).await;
            assert_eq!(register.packet_type(), PacketType::EventRegister);
            // Never confirm; cancel instead
            ctx.cancel();
            let unregister = read_packet(&mut raw).await;
            write_packet(&mut raw, &Packet::new(PacketType::EventConfirm, "", None)).await;
            unregister
        }
    );

    assert!(matches!(listened, Err(Error::Cancelled)));
    assert_eq!(unregister.packet_type(), PacketType::EventUnregister);
    assert_eq!(unregister.name(), "test-event");
    assert!(!session.is_listening().await);
}

#[tokio::test]
async fn test_daemon_disconnect_fails_listener() {
    let daemon = MockDaemon::new();
    let session = session_with(&daemon, SessionOptions::default());
    let (client, mut raw) = duplex(1024);

    let (listened, ()) = tokio::join!(
        session.listen_with(CancellationToken::new(), client, ["test-event"]),
        async {
            read_packet(&mut raw).await;
            write_packet(&mut raw, &Packet::new(PacketType::EventConfirm, "", None)).await;
        }
    );
    listened.unwrap();
    drop(raw);

    assert!(matches!(session.next_event().await, Err(Error::Io(_))));
    wait_stopped(&session).await;
    assert_eq!(session.listener_state().await, Some(ListenerState::Failed));
}
