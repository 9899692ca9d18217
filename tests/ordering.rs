#![cfg(not(loom))]
//! End-to-end ordering tests.
//!
//! Frames carry a scripted processing delay so workers finish out of order;
//! clients must still receive them in submission order.

use std::time::Duration;

use framepipe_testing::{TestServer, read_id, scripted_factory, tagged_png};
use rstest::rstest;

#[tokio::test]
async fn slow_first_frame_is_still_delivered_first() {
    let server = TestServer::start(scripted_factory(), |s| s.workers(2)).await;
    let mut client = server.connect().await;

    client.send_frame(tagged_png(100, 1)).await;
    client.send_frame(tagged_png(10, 2)).await;
    client.send_frame(tagged_png(10, 3)).await;

    assert_eq!(client.recv_ids(3).await, vec![1, 2, 3]);
    client.close().await;
    server.stop().await.expect("server stopped cleanly");
}

#[rstest]
#[case::more_frames_than_workers(2, 12)]
#[case::single_worker(1, 6)]
#[case::wide_pool(8, 24)]
#[tokio::test]
async fn burst_is_delivered_in_submission_order(#[case] workers: usize, #[case] frames: u8) {
    let server = TestServer::start(scripted_factory(), |s| s.workers(workers)).await;
    let mut client = server.connect().await;

    // Alternate long and short delays so completion order scrambles.
    for id in 0..frames {
        let delay = if id % 3 == 0 { 40 } else { 5 };
        client.send_frame(tagged_png(delay, id)).await;
    }

    let expected: Vec<u8> = (0..frames).collect();
    assert_eq!(client.recv_ids(usize::from(frames)).await, expected);
    assert!(
        client
            .recv_frame_within(Duration::from_millis(100))
            .await
            .is_none(),
        "no frame may be delivered twice"
    );
    client.close().await;
    server.stop().await.expect("server stopped cleanly");
}

#[tokio::test]
async fn connections_are_ordered_independently() {
    let server = TestServer::start(scripted_factory(), |s| s.workers(4)).await;
    let mut slow = server.connect().await;
    let mut fast = server.connect().await;

    for id in 0..4 {
        slow.send_frame(tagged_png(60, id)).await;
        fast.send_frame(tagged_png(5, 100 + id)).await;
    }

    assert_eq!(fast.recv_ids(4).await, vec![100, 101, 102, 103]);
    assert_eq!(slow.recv_ids(4).await, vec![0, 1, 2, 3]);
    slow.close().await;
    fast.close().await;
    server.stop().await.expect("server stopped cleanly");
}

#[tokio::test]
async fn delivered_frames_decode_to_images() {
    let server = TestServer::start(scripted_factory(), |s| s).await;
    let mut client = server.connect().await;

    for id in 0..3 {
        client.send_frame(tagged_png(1, id)).await;
    }
    for id in 0..3 {
        let payload = client.recv_frame().await.expect("frame delivered");
        let image = image::load_from_memory(&payload).expect("valid image");
        assert_eq!((image.width(), image.height()), (2, 1));
        assert_eq!(read_id(&payload), id);
    }
    client.close().await;
    server.stop().await.expect("server stopped cleanly");
}
