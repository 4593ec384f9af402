//! Byte transfers between two boards on a simulated bus.
//!
//! Both sides busy-poll once bytes flow, so every test that runs a talker and a listener
//! together uses a multi-threaded runtime and puts one side on a spawned task.

mod common;

use std::time::{Duration, Instant};

use common::{controller_and_device, listener_ready, pins, wait_for_wires, within};
use gpib_bitbang::{EosWidth, GpibError, ReadOutcome, StatusBits};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_eoi_ends_read() {
    let (_bus, mut talker, mut listener) = controller_and_device();

    let reader = tokio::spawn(async move {
        let mut buf = [0u8; 16];
        let outcome = listener.read(&mut buf, within(2000)).await.unwrap();
        (listener, outcome, buf)
    });

    let written = talker.write(b"ABC", true, within(2000)).await.unwrap();
    assert_eq!(written, 3);

    let (listener, outcome, buf) = reader.await.unwrap();
    assert_eq!(outcome, ReadOutcome { count: 3, end: true });
    assert_eq!(&buf[..3], b"ABC");
    assert!(listener.query_status(StatusBits::empty()).contains(StatusBits::END | StatusBits::LACS));
    assert!(talker.query_status(StatusBits::empty()).contains(StatusBits::TACS));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_buffer_without_end() {
    let (_bus, mut talker, mut listener) = controller_and_device();

    let reader = tokio::spawn(async move {
        let mut buf = [0u8; 4];
        let outcome = listener.read(&mut buf, within(2000)).await.unwrap();
        (outcome, buf)
    });

    talker.write(b"WXYZ", false, within(2000)).await.unwrap();
    let (outcome, buf) = reader.await.unwrap();
    assert_eq!(outcome, ReadOutcome { count: 4, end: false });
    assert_eq!(&buf, b"WXYZ");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_message_split_across_reads() {
    let (_bus, mut talker, mut listener) = controller_and_device();
    let message: Vec<u8> = (0u8..20).map(|i| b'a' + i).collect();

    let reader = tokio::spawn(async move {
        let mut received = Vec::new();
        let mut chunks = Vec::new();
        loop {
            let mut buf = [0u8; 8];
            let outcome = listener.read(&mut buf, within(2000)).await.unwrap();
            received.extend_from_slice(&buf[..outcome.count]);
            chunks.push(outcome);
            if outcome.end {
                break;
            }
        }
        (received, chunks)
    });

    assert_eq!(talker.write(&message, true, within(2000)).await.unwrap(), 20);
    let (received, chunks) = reader.await.unwrap();
    assert_eq!(received, message, "no byte lost or taken twice");
    assert_eq!(
        chunks,
        vec![
            ReadOutcome { count: 8, end: false },
            ReadOutcome { count: 8, end: false },
            ReadOutcome { count: 4, end: true },
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_eos_stops_before_remaining_bytes() {
    let (_bus, mut talker, mut listener) = controller_and_device();
    listener.configure_eos(0x0D, true, EosWidth::SevenBit);

    let reader = tokio::spawn(async move {
        let mut buf = [0u8; 8];
        let outcome = listener.read(&mut buf, within(2000)).await.unwrap();
        (outcome, buf)
    });

    // the listener stops after the terminator, so the third byte is never accepted
    let err = talker
        .write(&[0x53, 0x0D, 0x41], false, within(200))
        .await
        .unwrap_err();
    let (outcome, buf) = reader.await.unwrap();

    assert_eq!(outcome, ReadOutcome { count: 2, end: true });
    assert_eq!(&buf[..2], &[0x53, 0x0D]);
    assert!(err.is_timeout());
    assert_eq!(err.count, 2);
    assert!(talker.query_status(StatusBits::empty()).contains(StatusBits::TIMO));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_seven_bit_eos_ignores_high_bit() {
    let (_bus, mut talker, mut listener) = controller_and_device();
    listener.configure_eos(b'\n', true, EosWidth::SevenBit);

    let reader = tokio::spawn(async move {
        let mut buf = [0u8; 8];
        let outcome = listener.read(&mut buf, within(2000)).await.unwrap();
        (listener, outcome)
    });
    let _ = talker.write(&[0x8A, 0x31], true, within(200)).await;
    let (mut listener, outcome) = reader.await.unwrap();
    assert_eq!(outcome, ReadOutcome { count: 1, end: true });

    listener.configure_eos(b'\n', true, EosWidth::EightBit);
    let reader = tokio::spawn(async move {
        let mut buf = [0u8; 8];
        listener.read(&mut buf, within(2000)).await.unwrap()
    });
    talker.write(&[0x8A, 0x31], true, within(2000)).await.unwrap();
    let outcome = reader.await.unwrap();
    assert_eq!(outcome, ReadOutcome { count: 2, end: true }, "ended by EOI only");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_byte_not_written_until_accepted() {
    let (bus, mut talker, _device) = controller_and_device();
    let pins = pins();

    // a listener that says it is ready but never accepts
    let peer = bus.attach_node().unwrap();
    peer.pull_low(pins.ndac);

    let err = talker.write(b"Q", true, within(50)).await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(err.count, 0);
    // DAV and EOI are left asserted
    assert!(!bus.wire_level(pins.dav));
    assert!(!bus.wire_level(pins.eoi));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timeout_flag_bounds_turnaround_wait() {
    let (bus, _controller, mut listener) = controller_and_device();
    let pins = pins();
    let flag = listener.timeout_flag();

    let reader = tokio::spawn(async move {
        let mut buf = [0u8; 8];
        let result = listener.read(&mut buf, None).await;
        (result, buf, Instant::now())
    });

    // hand-driven talker: one byte, then DAV is never released
    let talker = bus.attach_node().unwrap();
    wait_for_wires(&bus, listener_ready).await;
    talker.pull_low(pins.data[0]);
    talker.pull_low(pins.dav);
    wait_for_wires(&bus, |bus| bus.wire_level(pins.ndac)).await;

    tokio::time::sleep(Duration::from_millis(20)).await;
    let raised_at = Instant::now();
    flag.raise();

    let (result, buf, returned_at) = reader.await.unwrap();
    let err = result.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(err.count, 1);
    assert_eq!(buf[0], 0x01);
    let latency = returned_at.saturating_duration_since(raised_at);
    assert!(latency < Duration::from_millis(10), "returned {latency:?} after the flag");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_read_resumes_after_turnaround_timeout() {
    let (bus, _controller, mut listener) = controller_and_device();
    let pins = pins();
    let (go_tx, go_rx) = tokio::sync::oneshot::channel::<()>();

    // hand-driven talker: byte 0x01 is handed over in full, then 0x02 waits for `go`
    let talker = bus.attach_node().unwrap();
    let talker_task = tokio::spawn({
        let bus = bus.clone();
        async move {
            wait_for_wires(&bus, listener_ready).await;
            talker.pull_low(pins.data[0]);
            talker.pull_low(pins.dav);
            wait_for_wires(&bus, |bus| bus.wire_level(pins.ndac)).await;
            talker.release(pins.dav);
            talker.release(pins.data[0]);
            wait_for_wires(&bus, listener_ready).await;

            go_rx.await.unwrap();
            talker.pull_low(pins.data[1]);
            talker.pull_low(pins.eoi);
            talker.pull_low(pins.dav);
            wait_for_wires(&bus, |bus| bus.wire_level(pins.ndac)).await;
            talker.release(pins.dav);
            talker.release(pins.eoi);
            talker.release(pins.data[1]);
            talker
        }
    });

    let mut buf = [0u8; 8];
    let err = listener.read(&mut buf, within(100)).await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(err.count, 1);
    assert_eq!(buf[0], 0x01);

    go_tx.send(()).unwrap();
    let mut buf = [0u8; 8];
    let outcome = listener.read(&mut buf, within(500)).await.unwrap();
    assert_eq!(outcome, ReadOutcome { count: 1, end: true });
    assert_eq!(buf[0], 0x02);
    let _talker = talker_task.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_write_reports_no_listeners() {
    let (_bus, mut talker, _device) = controller_and_device();
    let err = talker.write(b"lost", true, within(30)).await.unwrap_err();
    assert!(matches!(err.source, GpibError::NoListeners));
    assert_eq!(err.count, 0);
}

#[tokio::test]
async fn test_srq_does_not_satisfy_handshake_wait() {
    let (bus, _controller, mut listener) = controller_and_device();
    let pins = pins();
    let requester = bus.attach_node().unwrap();

    let srq = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        requester.pull_low(pins.srq);
        requester
    });

    let mut buf = [0u8; 4];
    let err = listener.read(&mut buf, within(100)).await.unwrap_err();
    let _requester = srq.await.unwrap();

    assert!(err.is_timeout());
    assert_eq!(err.count, 0);
    let status = listener.query_status(StatusBits::empty());
    assert!(status.contains(StatusBits::SRQI | StatusBits::TIMO));
    // only an explicit clear removes SRQI
    assert!(listener
        .query_status(StatusBits::SRQI)
        .contains(StatusBits::SRQI));
    assert!(!listener
        .query_status(StatusBits::empty())
        .contains(StatusBits::SRQI));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_srq_during_completed_read_stays_latched() {
    let (bus, mut talker, mut listener) = controller_and_device();
    let pins = pins();

    let reader = tokio::spawn(async move {
        let mut buf = [0u8; 8];
        let outcome = listener.read(&mut buf, within(2000)).await.unwrap();
        (listener, outcome, buf)
    });

    // SRQ goes low while the listener is suspended for the first byte
    wait_for_wires(&bus, listener_ready).await;
    let requester = bus.attach_node().unwrap();
    requester.pull_low(pins.srq);

    talker.write(b"OK", true, within(2000)).await.unwrap();
    let (listener, outcome, buf) = reader.await.unwrap();
    assert_eq!(outcome, ReadOutcome { count: 2, end: true });
    assert_eq!(&buf[..2], b"OK");

    let status = listener.query_status(StatusBits::empty());
    assert!(status.contains(StatusBits::SRQI | StatusBits::END));
    assert!(!status.contains(StatusBits::TIMO));
}

#[tokio::test]
async fn test_cancel_interrupts_suspended_read() {
    let (_bus, _controller, mut listener) = controller_and_device();
    let canceller = listener.canceller();

    tokio::spawn({
        let canceller = canceller.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        }
    });

    let mut buf = [0u8; 4];
    let err = listener.read(&mut buf, None).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.count, 0);
    assert!(!canceller.is_pending(), "request consumed");
    assert!(!listener
        .query_status(StatusBits::empty())
        .contains(StatusBits::TIMO));
}

#[tokio::test]
async fn test_cancel_requested_before_transfer() {
    let (_bus, mut controller, _device) = controller_and_device();
    controller.canceller().cancel();
    let err = controller.write(b"x", true, None).await.unwrap_err();
    assert!(matches!(err.source, GpibError::Cancelled));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_during_byte_stream_does_not_reach_next_write() {
    let (_bus, mut talker, mut listener) = controller_and_device();
    let canceller = talker.canceller();
    let message = [0x55u8; 32];

    let reader = tokio::spawn({
        let canceller = canceller.clone();
        async move {
            let mut first = [0u8; 1];
            listener.read(&mut first, within(2000)).await.unwrap();
            // the talker is past its first wait and polling for the next byte
            canceller.cancel();
            let mut rest = [0u8; 64];
            let outcome = listener.read(&mut rest, within(2000)).await.unwrap();
            (listener, outcome)
        }
    });

    assert_eq!(talker.write(&message, true, within(2000)).await.unwrap(), 32);
    let (mut listener, outcome) = reader.await.unwrap();
    assert_eq!(outcome, ReadOutcome { count: 31, end: true });
    assert!(!canceller.is_pending(), "late request dropped with its transfer");

    let reader = tokio::spawn(async move {
        let mut buf = [0u8; 8];
        listener.read(&mut buf, within(2000)).await.unwrap()
    });
    assert_eq!(talker.write(b"next", true, within(2000)).await.unwrap(), 4);
    assert_eq!(reader.await.unwrap(), ReadOutcome { count: 4, end: true });
}
