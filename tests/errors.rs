#![cfg(not(loom))]
//! Per-frame failures stay contained to the frame that caused them.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use bytes::Bytes;
use framepipe::{
    codec::{CodecError, ImageCodec, ImageFormatCodec, OutputFormat},
    engine::EngineInitError,
};
use image::DynamicImage;
use framepipe_testing::{
    FAIL,
    LoggerHandle,
    PANIC,
    ScriptedEngine,
    TestServer,
    logger,
    scripted_factory,
    tagged_png,
};
use rstest::rstest;
use serial_test::serial;

#[rstest]
#[case::engine_error(FAIL)]
#[case::engine_panic(PANIC)]
#[serial]
#[tokio::test]
async fn failed_frame_leaves_gap_but_later_frames_flow(#[case] tag: u8) {
    let server = TestServer::start(scripted_factory(), |s| s.workers(2)).await;
    let mut client = server.connect().await;

    client.send_frame(tagged_png(5, 1)).await;
    client.send_frame(tagged_png(tag, 2)).await;
    client.send_frame(tagged_png(5, 3)).await;

    assert_eq!(client.recv_ids(2).await, vec![1, 3]);
    client.close().await;
    server.stop().await.expect("server stopped cleanly");
}

/// Frame id the [`Refusing`] codec will not encode.
const UNENCODABLE: u8 = 2;

/// PNG codec that fails to encode one tagged frame.
struct Refusing(ImageFormatCodec);

impl ImageCodec for Refusing {
    fn decode(&self, payload: &[u8]) -> Result<DynamicImage, CodecError> { self.0.decode(payload) }

    fn encode(&self, image: &DynamicImage) -> Result<Bytes, CodecError> {
        if image.to_rgb8().get_pixel(1, 0).0[0] == UNENCODABLE {
            return Err(CodecError::ZeroArea {
                width: 0,
                height: 0,
            });
        }
        self.0.encode(image)
    }
}

#[rstest]
#[serial]
#[tokio::test]
async fn encode_failure_leaves_gap_and_is_logged(mut logger: LoggerHandle) {
    let server = TestServer::start(scripted_factory(), |s| {
        s.codec(Refusing(ImageFormatCodec::new(OutputFormat::Png)))
    })
    .await;
    let mut client = server.connect().await;

    client.send_frame(tagged_png(5, 1)).await;
    client.send_frame(tagged_png(5, UNENCODABLE)).await;
    client.send_frame(tagged_png(5, 3)).await;

    assert_eq!(client.recv_ids(2).await, vec![1, 3]);
    client.close().await;
    server.stop().await.expect("server stopped cleanly");

    assert_eq!(logger.take_matching("failed to encode frame 2 of").len(), 1);
}

#[rstest]
#[serial]
#[tokio::test]
async fn undecodable_payload_is_dropped_and_logged(mut logger: LoggerHandle) {
    let server = TestServer::start(scripted_factory(), |s| s).await;
    let mut client = server.connect().await;

    client.send_frame(b"definitely not an image".to_vec()).await;
    client.send_frame(tagged_png(1, 9)).await;

    assert_eq!(client.recv_ids(1).await, vec![9]);
    client.close().await;
    server.stop().await.expect("server stopped cleanly");

    assert_eq!(logger.take_matching("dropping undecodable frame").len(), 1);
}

#[serial]
#[tokio::test]
async fn text_messages_are_ignored() {
    let server = TestServer::start(scripted_factory(), |s| s).await;
    let mut client = server.connect().await;

    client.send_text("hello").await;
    client.send_frame(tagged_png(1, 4)).await;

    assert_eq!(client.recv_ids(1).await, vec![4]);
    client.close().await;
    server.stop().await.expect("server stopped cleanly");
}

#[rstest]
#[serial]
#[tokio::test]
async fn failed_engine_build_reduces_capacity(mut logger: LoggerHandle) {
    let builds = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&builds);
    // Only the first worker gets an engine.
    let factory = move || {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(ScriptedEngine)
        } else {
            Err(EngineInitError::Other("no device".into()))
        }
    };
    let server = TestServer::start(factory, |s| s.workers(3)).await;
    let mut client = server.connect().await;

    for id in 0..4 {
        client.send_frame(tagged_png(5, id)).await;
    }
    assert_eq!(client.recv_ids(4).await, vec![0, 1, 2, 3]);
    client.close().await;
    server.stop().await.expect("server stopped cleanly");

    assert_eq!(builds.load(Ordering::SeqCst), 3);
    assert_eq!(logger.take_matching("worker exiting").len(), 2);
}

#[serial]
#[tokio::test]
async fn oversized_message_closes_only_that_connection() {
    let server = TestServer::start(scripted_factory(), |s| s.max_message_size(256)).await;
    let mut big = server.connect().await;
    let mut small = server.connect().await;

    big.send_frame(vec![0u8; 4096]).await;
    assert!(big.closed_within(std::time::Duration::from_secs(5)).await);

    small.send_frame(tagged_png(1, 5)).await;
    assert_eq!(small.recv_ids(1).await, vec![5]);
    small.close().await;
    server.stop().await.expect("server stopped cleanly");
}
