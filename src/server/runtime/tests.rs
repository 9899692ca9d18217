//! Tests for server runtime behaviour.

use std::{
    io,
    sync::{Arc, Mutex},
};

use rstest::rstest;
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot},
    task::yield_now,
    time::{Duration, Instant, advance, timeout},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{AcceptLoopOptions, BackoffConfig, FrameServer, MockAcceptListener, accept_loop};
use crate::{
    config::TransportConfig,
    engine::EngineConfig,
    server::{
        connection::HandshakeOptions,
        test_util::{bind_server, factory, free_listener},
    },
};

fn options(token: &CancellationToken, tracker: &TaskTracker, backoff: BackoffConfig) -> AcceptLoopOptions {
    let (established, _) = mpsc::channel(1);
    AcceptLoopOptions {
        handshake: HandshakeOptions {
            transport: TransportConfig::default(),
            established,
            shutdown: token.clone(),
        },
        shutdown: token.clone(),
        tracker: tracker.clone(),
        backoff,
    }
}

#[rstest]
#[tokio::test]
async fn run_with_immediate_shutdown(factory: EngineConfig, free_listener: std::net::TcpListener) {
    let server = bind_server(factory, free_listener);
    let shutdown_future = async { tokio::time::sleep(Duration::from_millis(10)).await };
    let result = timeout(
        Duration::from_secs(5),
        server.run_with_shutdown(shutdown_future),
    )
    .await;
    assert!(result.expect("server did not finish in time").is_ok());
}

#[rstest]
#[tokio::test]
async fn ready_signal_fires_before_shutdown(
    factory: EngineConfig,
    free_listener: std::net::TcpListener,
) {
    let (ready_tx, ready_rx) = oneshot::channel();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = FrameServer::new(factory)
        .workers(1)
        .ready_signal(ready_tx)
        .bind_existing_listener(free_listener)
        .expect("bind");
    let handle = tokio::spawn(server.run_with_shutdown(async {
        let _ = stop_rx.await;
    }));

    timeout(Duration::from_secs(5), ready_rx)
        .await
        .expect("ready before timeout")
        .expect("ready sender kept");
    let _ = stop_tx.send(());
    handle
        .await
        .expect("server join error")
        .expect("server run failed");
}

#[rstest]
#[tokio::test]
async fn accept_loop_stops_on_shutdown_signal() {
    let token = CancellationToken::new();
    let tracker = TaskTracker::new();
    let listener = Arc::new(
        TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind test listener"),
    );

    tracker.spawn(accept_loop(
        listener,
        options(&token, &tracker, BackoffConfig::default()),
    ));

    token.cancel();
    tracker.close();

    let result = timeout(Duration::from_millis(100), tracker.wait()).await;
    assert!(result.is_ok());
}

/// Creates a mock listener that fails and records when it was called.
fn failing_listener(calls: &Arc<Mutex<Vec<Instant>>>, num_calls: usize) -> MockAcceptListener {
    let mut listener = MockAcceptListener::new();
    let call_log = Arc::clone(calls);
    listener
        .expect_accept()
        .returning(move || {
            let call_log = Arc::clone(&call_log);
            Box::pin(async move {
                call_log.lock().expect("lock").push(Instant::now());
                Err(io::Error::other("mock error"))
            })
        })
        .times(num_calls);
    listener
        .expect_local_addr()
        .returning(|| Ok("127.0.0.1:0".parse().expect("addr parse")))
        .times(num_calls);
    listener
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn accept_failures_back_off_exponentially() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let listener = Arc::new(failing_listener(&calls, 4));
    let token = CancellationToken::new();
    let tracker = TaskTracker::new();
    let backoff = BackoffConfig {
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
    };

    tracker.spawn(accept_loop(listener, options(&token, &tracker, backoff)));
    yield_now().await;
    assert_eq!(calls.lock().expect("lock").len(), 1);

    for ms in [5, 10, 20] {
        advance(Duration::from_millis(ms)).await;
        yield_now().await;
    }

    token.cancel();
    advance(Duration::from_millis(20)).await;
    yield_now().await;
    tracker.close();
    tracker.wait().await;

    let calls = calls.lock().expect("lock");
    let intervals: Vec<_> = calls
        .windows(2)
        .map(|pair| pair[1].duration_since(pair[0]))
        .collect();
    assert_eq!(
        intervals,
        vec![
            Duration::from_millis(5),
            Duration::from_millis(10),
            Duration::from_millis(20),
        ]
    );
}

#[rstest]
#[tokio::test]
async fn shutdown_interrupts_accept_backoff() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let listener = Arc::new(failing_listener(&calls, 1));
    let token = CancellationToken::new();
    let tracker = TaskTracker::new();
    let backoff = BackoffConfig {
        initial_delay: Duration::from_secs(10),
        max_delay: Duration::from_secs(10),
    };

    tracker.spawn(accept_loop(listener, options(&token, &tracker, backoff)));
    timeout(Duration::from_secs(1), async {
        while calls.lock().expect("lock").is_empty() {
            yield_now().await;
        }
    })
    .await
    .expect("first accept attempted");

    token.cancel();
    tracker.close();
    let result = timeout(Duration::from_millis(100), tracker.wait()).await;
    assert!(result.is_ok(), "accept loop still sleeping after shutdown");
}

#[test]
fn success_resets_failure_delay() {
    let mut backoff = BackoffConfig {
        initial_delay: Duration::from_millis(4),
        max_delay: Duration::from_millis(10),
    }
    .start();
    assert_eq!(backoff.failed(), Duration::from_millis(4));
    assert_eq!(backoff.failed(), Duration::from_millis(8));
    assert_eq!(backoff.failed(), Duration::from_millis(10));
    backoff.reset();
    assert_eq!(backoff.failed(), Duration::from_millis(4));
}

#[test]
fn next_delay_doubles_up_to_ceiling() {
    let backoff = BackoffConfig {
        initial_delay: Duration::from_millis(300),
        max_delay: Duration::from_secs(1),
    };
    assert_eq!(backoff.next_delay(Duration::from_millis(300)), Duration::from_millis(600));
    assert_eq!(backoff.next_delay(Duration::from_millis(600)), Duration::from_secs(1));
}
