//! Reply correlation, timeouts, cancellation and link error handling.

mod common;

use common::{connected, eventually, Device};
use nfdebug_core::wire::HEADER_SIZE;
use nfdebug_core::{CancelToken, Command, DeviceEvent, Error, Flags, Packet};
use std::thread;
use std::time::Duration;

#[test]
fn test_concurrent_requests_get_their_own_replies() {
    let mut device = Device::runtime();
    device.delays.insert(Command::THREAD_LIST, Duration::from_millis(120));
    device.delays.insert(Command::TARGET_INFO, Duration::from_millis(60));
    device.type_names.insert(0x0100_0003, "System.String".to_string());
    let (engine, _sim) = connected(device);
    let engine = &engine;

    thread::scope(|scope| {
        let threads = scope.spawn(|| engine.threads(&CancelToken::new()));
        let target = scope.spawn(|| engine.target_info(&CancelToken::new()));
        let regions = scope.spawn(|| engine.memory_map(&CancelToken::new()));
        let types: Vec<_> = (0x0100_0001..0x0100_0006u32)
            .map(|index| (index, scope.spawn(move || engine.resolve_type(index, &CancelToken::new()))))
            .collect();

        assert_eq!(threads.join().unwrap().unwrap(), vec![1, 3]);
        assert_eq!(target.join().unwrap().unwrap().target, "SIM_TARGET");
        assert_eq!(regions.join().unwrap().unwrap().len(), 2);
        for (index, handle) in types {
            let info = handle.join().unwrap().unwrap();
            assert_eq!(info.index, index);
            if index == 0x0100_0003 {
                assert_eq!(info.name, "System.String");
            } else {
                assert_eq!(info.name, format!("Type{index}"));
            }
        }
    });
    assert_eq!(engine.outstanding_requests(), 0);
    assert_eq!(engine.stats().unmatched_replies, 0);
}

#[test]
fn test_timeout_withdraws_the_waiter() {
    let mut device = Device::runtime();
    device.delays.insert(Command::THREAD_LIST, Duration::from_millis(500));
    let (engine, _sim) = connected(device);
    let mut events = engine.subscribe();

    let err = engine.threads(&CancelToken::new()).unwrap_err();
    assert!(matches!(err, Error::Timeout { command: Command::THREAD_LIST, .. }));
    assert_eq!(engine.outstanding_requests(), 0);

    // The late reply surfaces as an unsolicited packet and completes nothing.
    assert!(eventually(|| engine.stats().unmatched_replies == 1));
    let late = std::iter::from_fn(|| events.try_recv().ok())
        .find(|event| matches!(event, DeviceEvent::Unsolicited { command: Command::THREAD_LIST, .. }));
    assert!(late.is_some());
    assert!(engine.is_connected());
}

#[test]
fn test_cancel_while_waiting() {
    let mut device = Device::runtime();
    device.silent.insert(Command::THREAD_LIST);
    let (engine, _sim) = connected(device);
    let cancel = CancelToken::new();

    thread::scope(|scope| {
        let waiter = scope.spawn(|| engine.threads(&cancel));
        assert!(eventually(|| engine.outstanding_requests() == 1));

        cancel.cancel();
        let result = waiter.join().unwrap();
        assert!(matches!(result, Err(Error::Cancelled { command: Command::THREAD_LIST })));
    });
    assert_eq!(engine.outstanding_requests(), 0);
    assert!(engine.is_connected());
}

#[test]
fn test_cancelled_token_sends_nothing() {
    let (engine, sim) = connected(Device::runtime());
    sim.clear_log();
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = engine.memory_map(&cancel).unwrap_err();
    assert!(matches!(err, Error::Cancelled { command: Command::MEMORY_MAP }));
    assert_eq!(engine.outstanding_requests(), 0);

    engine.ping(&CancelToken::new()).unwrap();
    assert_eq!(sim.count(Command::MEMORY_MAP), 0);
}

#[test]
fn test_refusal_is_reported_as_nack() {
    let mut device = Device::runtime();
    device.nacked.insert(Command::EXECUTE);
    let (engine, _sim) = connected(device);

    let err = engine.execute(0x0800_0000, &CancelToken::new()).unwrap_err();
    assert!(matches!(err, Error::Nack { command: Command::EXECUTE }));
    assert!(engine.is_connected());
}

#[test]
fn test_garbage_before_a_reply_is_skipped() {
    let (engine, sim) = connected(Device::runtime());

    sim.send_bytes(b"noise");
    engine.ping(&CancelToken::new()).unwrap();

    assert!(eventually(|| engine.stats().spurious_bytes == 5));
    assert!(engine.is_connected());
}

#[test]
fn test_corrupt_payload_is_nacked() {
    let (engine, sim) = connected(Device::runtime());
    let mut events = engine.subscribe();

    let mut bytes = Packet::new(Command::MESSAGE, Flags::NONE, 0x9000, 0, b"hello\0".to_vec()).to_bytes();
    bytes[HEADER_SIZE] ^= 0xFF;
    sim.send_bytes(&bytes);

    assert!(eventually(|| engine.stats().nacks_sent == 1));
    assert_eq!(engine.stats().bad_payloads, 1);
    assert!(eventually(|| {
        sim.host_replies().iter().any(|h| {
            h.flags.contains(Flags::NACK) && h.flags.contains(Flags::BAD_PAYLOAD) && h.seq_reply == 0x9000
        })
    }));

    // The damaged message is not delivered.
    engine.ping(&CancelToken::new()).unwrap();
    assert!(std::iter::from_fn(|| events.try_recv().ok()).all(|e| !matches!(e, DeviceEvent::Message(_))));
}

#[test]
fn test_corrupt_header_is_nacked() {
    let (engine, sim) = connected(Device::runtime());

    let mut bytes = Packet::new(Command::MESSAGE, Flags::NONE, 0x9001, 0, b"hi\0".to_vec()).to_bytes();
    bytes[4] ^= 0x01;
    sim.send_bytes(&bytes);
    engine.ping(&CancelToken::new()).unwrap();

    assert!(eventually(|| engine.stats().bad_headers == 1));
    assert!(eventually(|| {
        sim.host_replies().iter().any(|h| h.flags.contains(Flags::NACK) && h.flags.contains(Flags::BAD_HEADER))
    }));
    assert!(engine.is_connected());
}

#[test]
fn test_large_write_is_split_into_frames() {
    let (engine, sim) = connected(Device::runtime());
    sim.clear_log();

    let config = engine.config().clone();
    assert!(config.memory_chunk_size < nfdebug_core::wire::MAX_PAYLOAD_SIZE);
    let data = vec![0xA5; 300];
    engine.write_memory(common::MEMORY_BASE, &data, &CancelToken::new()).unwrap();
    assert_eq!(sim.count(Command::WRITE_MEMORY), 300usize.div_ceil(config.memory_chunk_size));
}
