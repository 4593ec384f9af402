//! Any byte sequence written with EOI arrives unchanged in one read.

mod common;

use common::{controller_and_device, within};
use gpib_bitbang::ReadOutcome;
use proptest::prelude::*;

/// Write `message` with EOI and read it into a buffer with `spare` extra bytes of room.
async fn round_trip(message: Vec<u8>, spare: usize) -> (Vec<u8>, usize, ReadOutcome) {
    let (_bus, mut talker, mut listener) = controller_and_device();
    let capacity = message.len() + spare;

    let reader = tokio::spawn(async move {
        let mut buf = vec![0u8; capacity];
        let outcome = listener.read(&mut buf, within(2000)).await.unwrap();
        buf.truncate(outcome.count);
        (buf, outcome)
    });

    let written = talker.write(&message, true, within(2000)).await.unwrap();
    let (received, outcome) = reader.await.unwrap();
    (received, written, outcome)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

#[test]
fn test_boundary_messages() {
    let rt = runtime();
    let cases: [&[u8]; 5] = [&[0x00], &[0xFF], &[0x41], &[0x00, 0xFF, 0x00], &[0xFF; 9]];
    for message in cases {
        let (received, written, outcome) = rt.block_on(round_trip(message.to_vec(), 0));
        assert_eq!(written, message.len());
        assert_eq!(outcome, ReadOutcome { count: message.len(), end: true });
        assert_eq!(received, message);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn test_any_message_round_trips(
        message in prop::collection::vec(any::<u8>(), 1..48),
        spare in 0usize..4,
    ) {
        let (received, written, outcome) = runtime().block_on(round_trip(message.clone(), spare));
        prop_assert_eq!(written, message.len());
        prop_assert_eq!(outcome, ReadOutcome { count: message.len(), end: true });
        prop_assert_eq!(received, message);
    }
}
