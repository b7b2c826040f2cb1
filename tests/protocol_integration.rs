//! Live-socket integration tests: a real coordinator (and proxy) on
//! ephemeral ports, driven by hand-rolled TLV clients so block sizes stay
//! under test control. The full worker loop is exercised separately in the
//! (slow, `--ignored`) end-to-end scan test at the bottom.

use std::path::PathBuf;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};

use lnrc::coordinator::{self, Config};
use lnrc::tlv::{read_frame, write_frame, Frame, FrameType};

/// Spawn a coordinator on an ephemeral port, returning its address.
async fn spawn_coordinator(resume: Option<u128>, log_path: PathBuf) -> std::net::SocketAddr {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cfg = Config {
        port: 0,
        resume,
        log_path,
    };
    tokio::spawn(async move {
        let _ = coordinator::run_on(listener, cfg).await;
    });
    addr
}

/// NEW handshake: returns the allocated cid.
async fn open_channel(stream: &mut TcpStream) -> u16 {
    write_frame(stream, &Frame::new(FrameType::New, 0, 0))
        .await
        .unwrap();
    let f = timeout(Duration::from_secs(5), read_frame(stream))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(f.ftype, FrameType::New);
    f.cid
}

/// READY → (SEED, COUNT, GO) exchange: returns the assignment.
async fn request_block(stream: &mut TcpStream, cid: u16) -> (u128, u64) {
    write_frame(stream, &Frame::new(FrameType::Ready, cid, 0))
        .await
        .unwrap();
    let mut seed = 0u128;
    let mut count = 0u64;
    loop {
        let f = timeout(Duration::from_secs(5), read_frame(stream))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(f.cid, cid);
        match f.ftype {
            FrameType::Seed => seed = f.value,
            FrameType::Count => count = f.value as u64,
            FrameType::Go => return (seed, count),
            other => panic!("unexpected frame {other:?}"),
        }
    }
}

#[tokio::test]
async fn resume_dispatches_the_requested_candidate() {
    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_coordinator(Some(0x5f5e101), dir.path().join("lnrc.log")).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let cid = open_channel(&mut stream).await;
    let (seed, count) = request_block(&mut stream, cid).await;

    // -e 0x5f5e101 resumes at candidate 0x5f5e101 = 2·0x2faf080 + 1
    assert_eq!(seed, 0x2faf080);
    assert_eq!(count & 1, 1);
    assert!(count >= 5);
}

#[tokio::test]
async fn blocks_tile_the_stream_across_workers() {
    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_coordinator(Some(201), dir.path().join("lnrc.log")).await;

    let mut w1 = TcpStream::connect(addr).await.unwrap();
    let mut w2 = TcpStream::connect(addr).await.unwrap();
    let c1 = open_channel(&mut w1).await;
    let c2 = open_channel(&mut w2).await;
    assert_ne!(c1, c2);

    let (s1, n1) = request_block(&mut w1, c1).await;
    let (s2, _n2) = request_block(&mut w2, c2).await;
    assert_eq!(s1, 100); // (201 − 1) / 2
    assert_eq!(s2, s1 + n1 as u128, "second block starts where the first ends");
}

#[tokio::test]
async fn dropped_worker_block_is_reassigned() {
    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_coordinator(Some(2001), dir.path().join("lnrc.log")).await;

    let mut w1 = TcpStream::connect(addr).await.unwrap();
    let c1 = open_channel(&mut w1).await;
    let (s1, n1) = request_block(&mut w1, c1).await;
    drop(w1); // worker dies mid-block

    // give the coordinator a moment to notice the close
    sleep(Duration::from_millis(300)).await;

    let mut w2 = TcpStream::connect(addr).await.unwrap();
    let c2 = open_channel(&mut w2).await;
    let (s2, n2) = request_block(&mut w2, c2).await;
    assert_eq!(s2, s1, "the dead block's seed reappears");
    assert!(n2 <= n1);
}

#[tokio::test]
async fn anomaly_reports_land_in_the_log() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("lnrc.log");
    let addr = spawn_coordinator(None, log.clone()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let cid = open_channel(&mut stream).await;
    write_frame(
        &mut stream,
        &Frame::new(FrameType::Pseudocomposite, cid, 0x5f5e103),
    )
    .await
    .unwrap();
    write_frame(&mut stream, &Frame::new(FrameType::B1, cid, 1)).await.unwrap();

    // append-open-close per record; poll until both lines are visible
    let mut content = String::new();
    for _ in 0..50 {
        sleep(Duration::from_millis(100)).await;
        content = std::fs::read_to_string(&log).unwrap_or_default();
        if content.lines().count() >= 2 {
            break;
        }
    }
    assert!(
        content.contains("Pseudocomposite 0x00000000000000000000000005f5e103"),
        "log was: {content:?}"
    );
    assert!(content.contains("B == 1 0x00000000000000000000000000000001"));
}

#[tokio::test]
async fn proxy_multiplexes_two_workers_onto_one_upstream() {
    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_coordinator(Some(42001), dir.path().join("lnrc.log")).await;

    // reserve an ephemeral port for the proxy listener
    let probe = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
    let proxy_port = probe.local_addr().unwrap().port();
    drop(probe);

    tokio::spawn(lnrc::proxy::run(lnrc::proxy::Config {
        listen_port: proxy_port,
        upstream: addr,
    }));
    sleep(Duration::from_millis(300)).await;

    let mut w1 = TcpStream::connect(("127.0.0.1", proxy_port)).await.unwrap();
    let mut w2 = TcpStream::connect(("127.0.0.1", proxy_port)).await.unwrap();
    let c1 = open_channel(&mut w1).await;
    let c2 = open_channel(&mut w2).await;
    assert_ne!(c1, c2, "each downstream worker gets its own cid");

    let (s1, n1) = request_block(&mut w1, c1).await;
    let (s2, _) = request_block(&mut w2, c2).await;
    assert_eq!(s1, 21000);
    assert_eq!(s2, s1 + n1 as u128, "blocks stay distinct through the proxy");
}

/// Full-stack scan: a real worker pulls and completes blocks against a live
/// coordinator. Slow in debug builds (each block is ~half a million kernel
/// calls), so it only runs with `cargo test -- --ignored`.
///
/// The worker is alone on the coordinator for the whole wait, so the cursor
/// position observed afterwards counts exactly the blocks dispatched to it:
/// two or more block-lengths of progress proves at least one completed
/// READY → SEED/COUNT/GO → READY cycle.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn end_to_end_scan_completes_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("lnrc.log");
    let addr = spawn_coordinator(Some(1), log.clone()).await;

    tokio::spawn(lnrc::worker::run(addr));
    sleep(Duration::from_secs(90)).await;

    let mut observer = TcpStream::connect(addr).await.unwrap();
    let cid = open_channel(&mut observer).await;
    let (seed, count) = request_block(&mut observer, cid).await;
    assert!(
        seed >= 2 * count as u128,
        "cursor at {seed}: the worker never completed a block"
    );
    // the scanned prefix holds no counterexamples
    assert_eq!(std::fs::read_to_string(&log).unwrap_or_default(), "");
}
