#![cfg(not(loom))]
//! Clients vanishing mid-stream must not disturb the server or its other
//! connections.

use std::time::Duration;

use framepipe_testing::{LoggerHandle, TestServer, logger, scripted_factory, tagged_png};
use rstest::rstest;
use serial_test::serial;

#[rstest]
#[serial]
#[tokio::test]
async fn disconnect_mid_stream_delivers_only_a_prefix(mut logger: LoggerHandle) {
    let server = TestServer::start(scripted_factory(), |s| s.workers(2)).await;
    let mut client = server.connect().await;

    client.send_frame(tagged_png(5, 0)).await;
    client.send_frame(tagged_png(5, 1)).await;
    client.send_frame(tagged_png(200, 2)).await;
    client.send_frame(tagged_png(5, 3)).await;
    client.send_frame(tagged_png(5, 4)).await;

    // Frame 2 is still in the engine when the client goes away.
    let first = client.recv_frame().await.expect("first frame");
    assert_eq!(framepipe_testing::read_id(&first), 0);
    drop(client);

    // Let the slow frame finish against a connection that no longer exists.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut other = server.connect().await;
    other.send_frame(tagged_png(5, 7)).await;
    assert_eq!(other.recv_ids(1).await, vec![7]);
    other.close().await;
    server.stop().await.expect("server stopped cleanly");

    let records = logger.take_matching("connection=ConnectionId(0)");
    let count = |needle: &str| records.iter().filter(|line| line.contains(needle)).count();
    assert_eq!(count("connection closed: "), 1, "first connection torn down exactly once");
    // Frame 2 finished after the teardown: its completion is a no-op.
    assert!(count("connection closed before completion") >= 1, "{records:#?}");
    // Nothing from frame 2 onwards (sequence 3 and up) reached the socket.
    let sent_late = records
        .iter()
        .filter(|line| line.starts_with("frame queued for send"))
        .filter(|line| ["sequence=3", "sequence=4", "sequence=5"].iter().any(|s| line.ends_with(s)))
        .count();
    assert_eq!(sent_late, 0, "{records:#?}");
}

#[serial]
#[tokio::test]
async fn peer_close_does_not_perturb_other_connections() {
    let server = TestServer::start(scripted_factory(), |s| s.workers(3)).await;
    let mut leaving = server.connect().await;
    let mut staying = server.connect().await;

    for id in 0..5 {
        leaving.send_frame(tagged_png(30, id)).await;
        staying.send_frame(tagged_png(15, 10 + id)).await;
    }
    leaving.close().await;

    assert_eq!(staying.recv_ids(5).await, vec![10, 11, 12, 13, 14]);
    staying.close().await;
    server.stop().await.expect("server stopped cleanly");
}

#[serial]
#[tokio::test]
async fn many_short_lived_connections_leave_server_usable() {
    let server = TestServer::start(scripted_factory(), |s| s.workers(2)).await;
    for round in 0..10 {
        let mut client = server.connect().await;
        client.send_frame(tagged_png(20, round)).await;
        drop(client);
    }

    let mut client = server.connect().await;
    client.send_frame(tagged_png(1, 42)).await;
    assert_eq!(client.recv_ids(1).await, vec![42]);
    client.close().await;
    server.stop().await.expect("server stopped cleanly");
}
