// Publishing, visibility and waiting between one writer and its readers.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use common::TestChannel;
use shm_comm::{DataState, Deadline, Reader, ShmError, Writer};

#[test]
fn fresh_channel_has_no_data() {
    let chan = TestChannel::create("fresh", 16, 2);
    let _writer = Writer::connect(&chan.name).unwrap();
    let mut reader = Reader::connect(&chan.name).unwrap();

    assert_eq!(reader.try_get().unwrap(), DataState::NoData);
    assert_eq!(reader.try_get().unwrap().data(), None);
}

#[test]
fn new_then_old_for_every_reader() {
    let chan = TestChannel::create("new_old", 16, 3);
    let mut writer = Writer::connect(&chan.name).unwrap();
    let mut readers: Vec<Reader> = (0..3).map(|_| Reader::connect(&chan.name).unwrap()).collect();

    writer.write(&[7u8; 16]).unwrap();

    for reader in &mut readers {
        let first = reader.try_get().unwrap();
        assert!(first.is_new());
        let first_ptr = first.data().unwrap().as_ptr();

        match reader.try_get().unwrap() {
            DataState::OldData(data) => {
                assert_eq!(data.as_ptr(), first_ptr);
                assert_eq!(data, &[7u8; 16]);
            }
            other => panic!("expected OldData, got {other:?}"),
        }
    }
}

#[test]
fn bytes_written_are_bytes_read() {
    let chan = TestChannel::create("bytes", 64, 1);
    let mut writer = Writer::connect(&chan.name).unwrap();
    let mut reader = Reader::connect(&chan.name).unwrap();

    let slot = writer.acquire_write_slot().unwrap();
    assert_eq!(slot.len(), 64);
    for (i, b) in slot.iter_mut().enumerate() {
        *b = (i * 3) as u8;
    }
    writer.publish().unwrap();

    let expected: Vec<u8> = (0..64).map(|i| (i * 3) as u8).collect();
    assert_eq!(reader.try_get().unwrap(), DataState::NewData(&expected[..]));
}

#[test]
fn reader_sees_only_the_latest_value() {
    let chan = TestChannel::create("latest", 8, 1);
    let mut writer = Writer::connect(&chan.name).unwrap();
    let mut reader = Reader::connect(&chan.name).unwrap();

    for i in 0..10u64 {
        writer.write(&i.to_le_bytes()).unwrap();
    }
    let state = reader.try_get().unwrap();
    assert!(state.is_new());
    assert_eq!(state.data().unwrap(), &9u64.to_le_bytes());
}

#[test]
fn oversized_payload_is_rejected() {
    let chan = TestChannel::create("oversized", 4, 1);
    let mut writer = Writer::connect(&chan.name).unwrap();

    assert!(matches!(
        writer.write(b"too long"),
        Err(ShmError::InvalidArgument(_))
    ));
    assert_eq!(writer.held_slot(), None);
}

#[test]
fn reader_capacity_is_enforced() {
    let chan = TestChannel::create("capacity", 8, 2);

    let first = Reader::connect(&chan.name).unwrap();
    let second = Reader::connect(&chan.name).unwrap();
    assert_ne!(first.id(), second.id());

    assert!(matches!(
        Reader::connect(&chan.name),
        Err(ShmError::NoReaderSlots { max_readers: 2, .. })
    ));

    let freed = first.id();
    first.release().unwrap();
    let third = Reader::connect(&chan.name).unwrap();
    assert_eq!(third.id(), freed);

    drop(second);
    assert!(Reader::connect(&chan.name).is_ok());
}

#[test]
fn reclaimed_identity_starts_fresh() {
    let chan = TestChannel::create("fresh_id", 8, 1);
    let mut writer = Writer::connect(&chan.name).unwrap();
    writer.write(b"a").unwrap();

    let mut reader = Reader::connect(&chan.name).unwrap();
    assert!(reader.try_get().unwrap().is_new());
    drop(reader);

    let mut reader = Reader::connect(&chan.name).unwrap();
    assert!(reader.try_get().unwrap().is_new());
}

#[test]
fn publish_without_slot() {
    let chan = TestChannel::create("no_slot", 8, 1);
    let mut writer = Writer::connect(&chan.name).unwrap();

    assert!(matches!(writer.publish(), Err(ShmError::NoSlotAcquired)));

    writer.write(b"x").unwrap();
    assert!(matches!(writer.publish(), Err(ShmError::NoSlotAcquired)));
}

#[test]
fn acquire_is_idempotent_until_publish() {
    let chan = TestChannel::create("idempotent", 8, 1);
    let mut writer = Writer::connect(&chan.name).unwrap();

    let first = writer.acquire_write_slot().unwrap().as_ptr();
    let held = writer.held_slot();
    let second = writer.acquire_write_slot().unwrap().as_ptr();
    assert_eq!(first, second);
    assert_eq!(writer.held_slot(), held);

    writer.publish().unwrap();
    assert_eq!(writer.held_slot(), None);
    let next = writer.acquire_write_slot().unwrap().as_ptr();
    assert_ne!(next, first);
}

#[test]
fn writer_never_hands_out_a_pinned_slot() {
    const READERS: usize = 3;
    let chan = TestChannel::create("pinned", 8, READERS);
    let mut writer = Writer::connect(&chan.name).unwrap();
    let mut readers: Vec<Reader> = (0..READERS)
        .map(|_| Reader::connect(&chan.name).unwrap())
        .collect();

    // Each reader pins a different slot, the last one shared with latest.
    let mut pinned = Vec::new();
    for (i, reader) in readers.iter_mut().enumerate() {
        writer.write(&[i as u8]).unwrap();
        let state = reader.try_get().unwrap();
        assert!(state.is_new());
        pinned.push(state.data().unwrap());
    }

    for round in 0..50u8 {
        let slot = writer.acquire_write_slot().unwrap();
        for data in &pinned {
            assert_ne!(data.as_ptr(), slot.as_ptr());
        }
        slot.fill(100 + round);
        writer.publish().unwrap();
    }

    for (i, data) in pinned.iter().enumerate() {
        assert_eq!(data[0], i as u8);
    }
}

#[test]
fn writer_connect_resets_latest() {
    let chan = TestChannel::create("reset", 8, 1);
    let mut writer = Writer::connect(&chan.name).unwrap();
    writer.write(b"old").unwrap();
    drop(writer);

    let _writer = Writer::connect(&chan.name).unwrap();
    let mut reader = Reader::connect(&chan.name).unwrap();
    assert_eq!(reader.try_get().unwrap(), DataState::NoData);
}

#[test]
fn wait_returns_published_data() {
    let chan = TestChannel::create("wait_before", 8, 1);
    let mut writer = Writer::connect(&chan.name).unwrap();
    let mut reader = Reader::connect(&chan.name).unwrap();

    // Published before wait: returns immediately.
    writer.write(b"early").unwrap();
    assert!(reader.wait().unwrap().is_new());

    // Published while waiting.
    let publisher = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        writer.write(b"late").unwrap();
    });
    let state = reader.wait().unwrap();
    assert!(state.is_new());
    assert_eq!(&state.data().unwrap()[..4], b"late");
    publisher.join().unwrap();
}

#[test]
fn wait_blocks_until_first_publish() {
    let chan = TestChannel::create("wait_first", 8, 1);
    let mut writer = Writer::connect(&chan.name).unwrap();
    let mut reader = Reader::connect(&chan.name).unwrap();

    let start = Instant::now();
    let publisher = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        writer.write(b"first").unwrap();
    });
    assert!(reader.wait().unwrap().is_new());
    assert!(start.elapsed() >= Duration::from_millis(40));
    publisher.join().unwrap();
}

#[test]
fn timedwait_times_out_repeatedly() {
    let chan = TestChannel::create("timeout", 8, 1);
    let mut writer = Writer::connect(&chan.name).unwrap();
    let mut reader = Reader::connect(&chan.name).unwrap();

    // Nothing published yet.
    let deadline = Deadline::after(Duration::from_millis(100));
    assert!(matches!(reader.timedwait(deadline), Err(ShmError::Timeout)));
    assert!(deadline.has_elapsed());

    // Seen already.
    writer.write(b"x").unwrap();
    assert!(reader.try_get().unwrap().is_new());
    for _ in 0..2 {
        let start = Instant::now();
        let result = reader.timedwait(Deadline::after(Duration::from_millis(100)));
        assert!(matches!(result, Err(ShmError::Timeout)));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(90), "woke early after {elapsed:?}");
        assert!(elapsed < Duration::from_millis(150), "woke late after {elapsed:?}");
    }

    // Unseen data beats the deadline.
    writer.write(b"y").unwrap();
    let state = reader.timedwait(Deadline::after(Duration::from_millis(100))).unwrap();
    assert!(state.is_new());
}

#[test]
fn timedwait_wakes_on_publish() {
    let chan = TestChannel::create("timed_wake", 8, 1);
    let mut writer = Writer::connect(&chan.name).unwrap();
    let mut reader = Reader::connect(&chan.name).unwrap();

    let publisher = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        writer.write(b"z").unwrap();
    });
    let state = reader
        .timedwait(Deadline::after(Duration::from_secs(5)))
        .unwrap();
    assert_eq!(state.data().unwrap()[0], b'z');
    publisher.join().unwrap();
}

#[test]
fn concurrent_readers_see_monotonic_values() {
    const READERS: usize = 4;
    const VALUES: u64 = 2000;

    let chan = TestChannel::create("concurrent", 16, READERS);
    let mut writer = Writer::connect(&chan.name).unwrap();
    let ready = Arc::new(Barrier::new(READERS + 1));
    let done = Arc::new(AtomicBool::new(false));

    let handles: Vec<_> = (0..READERS)
        .map(|_| {
            let name = chan.name.clone();
            let ready = Arc::clone(&ready);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                // Readers stay on the thread that connected them.
                let mut reader = Reader::connect(&name).unwrap();
                ready.wait();

                let mut last = None;
                let mut new_values = 0usize;
                loop {
                    let finished = done.load(Ordering::Acquire);
                    match reader
                        .timedwait(Deadline::after(Duration::from_millis(10)))
                    {
                        Ok(DataState::NewData(data)) => {
                            let (a, b) = data.split_at(8);
                            let value = u64::from_le_bytes(a.try_into().unwrap());
                            // Both halves come from the same publish.
                            assert_eq!(a, b);
                            if let Some(prev) = last {
                                assert!(value > prev, "{value} after {prev}");
                            }
                            last = Some(value);
                            new_values += 1;
                        }
                        Ok(other) => panic!("unexpected state {other:?}"),
                        Err(ShmError::Timeout) if finished => break,
                        Err(ShmError::Timeout) => {}
                        Err(e) => panic!("reader failed: {e}"),
                    }
                }
                (last, new_values)
            })
        })
        .collect();

    ready.wait();
    for value in 1..=VALUES {
        let slot = writer.acquire_write_slot().unwrap();
        slot[..8].copy_from_slice(&value.to_le_bytes());
        slot[8..].copy_from_slice(&value.to_le_bytes());
        writer.publish().unwrap();
    }
    done.store(true, Ordering::Release);

    for handle in handles {
        let (last, new_values) = handle.join().unwrap();
        assert_eq!(last, Some(VALUES));
        assert!(new_values >= 1);
    }
}
