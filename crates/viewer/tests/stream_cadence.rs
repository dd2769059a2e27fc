//! End-to-end pacing: a 30 Hz producer against a 10 fps session must
//! deliver roughly ten distinct frames per second, not thirty.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use scope_viewer::server::StreamPacer;
use scope_viewer::store::FrameStore;

#[test]
fn session_rate_is_decoupled_from_capture_rate() {
    let store = Arc::new(FrameStore::new());
    let producer_store = store.clone();

    let producer = thread::spawn(move || {
        for i in 0..34u8 {
            producer_store.publish(vec![i]);
            thread::sleep(Duration::from_millis(33));
        }
    });

    let mut pacer = StreamPacer::new(10);
    let mut sent_versions = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(1);
    while Instant::now() < deadline {
        if pacer.due(store.version(), Instant::now()) {
            let frame = store.latest().expect("version implies a published frame");
            sent_versions.push(frame.version);
        }
        thread::sleep(Duration::from_millis(5));
    }
    producer.join().expect("producer thread");

    assert!(
        (8..=12).contains(&sent_versions.len()),
        "expected about 10 sends in one second, got {}",
        sent_versions.len()
    );
    for pair in sent_versions.windows(2) {
        assert!(pair[1] > pair[0], "versions must be distinct and increasing");
    }
}

#[test]
fn a_consumer_slower_than_the_producer_skips_frames_without_blocking_it() {
    let store = FrameStore::new();
    for i in 0..30u8 {
        store.publish(vec![i]);
    }
    // The slot only ever holds the newest frame; a consumer arriving late
    // sees the latest version, not a backlog.
    let latest = store.latest().expect("published");
    assert_eq!(latest.version, 30);
    assert_eq!(latest.jpeg, vec![29]);
}
