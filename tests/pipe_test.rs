//! Stream pipe tests: FIFO order, wrap-around, blocking, cancellation,
//! lifetime, and listener fan-out.
//!
//! Run with: `cargo test`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use memdev::error::DevError;
use memdev::pipe::cancel::CancelToken;
use memdev::pipe::stream::{OpenMode, PipeHandle, PipeListener, StreamPipe};

/// Keep writing until all of `data` is accepted (single calls stop at the
/// physical buffer end).
fn write_all(handle: &PipeHandle, data: &[u8]) {
    let mut sent = 0;
    while sent < data.len() {
        sent += handle.write(&data[sent..]).expect("write");
    }
}

/// Keep reading until `want` bytes are collected.
fn read_exact(handle: &PipeHandle, want: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(want);
    let mut buf = [0u8; 64];
    while out.len() < want {
        let n = handle.read(&mut buf).expect("read");
        out.extend_from_slice(&buf[..n]);
    }
    out
}

#[test]
fn test_fifo_order_capacity_8() {
    let pipe = StreamPipe::new(8).expect("new");
    let writer = pipe.open(OpenMode::Write).expect("open writer");
    let reader = pipe.open(OpenMode::Read).expect("open reader");

    // 7 bytes fit exactly in the 7 usable slots.
    assert_eq!(writer.write(b"ABCDEFG").expect("write"), 7);

    let mut buf = [0u8; 16];
    let n = reader.read(&mut buf).expect("read");
    assert_eq!(&buf[..n], b"ABCDEFG");
}

#[test]
fn test_full_buffer_capacity_4() {
    let pipe = StreamPipe::new(4).expect("new");
    let handle = pipe.open(OpenMode::ReadWrite).expect("open");

    // 3 usable bytes.
    assert_eq!(handle.write(b"XYZ").expect("write"), 3);
    assert!(matches!(handle.try_write(b"Q"), Err(DevError::WouldBlock)));

    let mut buf = [0u8; 1];
    assert_eq!(handle.read(&mut buf).expect("read"), 1);
    assert_eq!(&buf, b"X");

    // One slot opened up.
    assert_eq!(handle.try_write(b"Q").expect("write"), 1);
}

#[test]
fn test_try_read_empty_would_block() {
    let pipe = StreamPipe::new(8).expect("new");
    let handle = pipe.open(OpenMode::ReadWrite).expect("open");
    let mut buf = [0u8; 4];
    assert!(matches!(handle.try_read(&mut buf), Err(DevError::WouldBlock)));
}

#[test]
fn test_blocking_read_wakes_on_concurrent_write() {
    let pipe = StreamPipe::new(8).expect("new");
    let writer = pipe.open(OpenMode::Write).expect("open writer");
    let reader = pipe.open(OpenMode::Read).expect("open reader");

    let t = thread::spawn(move || {
        let mut buf = [0u8; 4];
        // Blocks until the writer delivers; the caller never sees WouldBlock.
        let n = reader.read(&mut buf).expect("read");
        buf[..n].to_vec()
    });

    thread::sleep(Duration::from_millis(100));
    writer.write(b"hi").expect("write");

    assert_eq!(t.join().expect("join"), b"hi");
}

#[test]
fn test_broadcast_wakes_all_waiters_one_consumes() {
    let pipe = StreamPipe::new(8).expect("new");
    let writer = pipe.open(OpenMode::Write).expect("open writer");
    let token = CancelToken::new();

    // Two readers blocked on the same empty buffer.
    let mut waiters = Vec::new();
    for _ in 0..2 {
        let reader = pipe.open(OpenMode::Read).expect("open reader");
        let reader_token = token.clone();
        waiters.push(thread::spawn(move || {
            let mut buf = [0u8; 4];
            reader
                .read_cancellable(&mut buf, &reader_token)
                .map(|n| buf[..n].to_vec())
        }));
    }

    thread::sleep(Duration::from_millis(100));
    writer.write(b"Q").expect("write");
    thread::sleep(Duration::from_millis(100));
    // The wakeup is broadcast: both waiters were signalled, one consumed
    // the byte, the other found the buffer empty again and went back to
    // waiting. Release it through the token.
    token.cancel();

    let results: Vec<_> = waiters
        .into_iter()
        .map(|t| t.join().expect("join"))
        .collect();
    let consumed: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    let interrupted = results
        .iter()
        .filter(|r| matches!(r, Err(DevError::Interrupted)))
        .count();
    assert_eq!(consumed.len(), 1, "exactly one reader gets the byte");
    assert_eq!(consumed[0].as_slice(), b"Q");
    assert_eq!(interrupted, 1, "the losing reader re-validated and kept waiting");
}

#[test]
fn test_capacity_is_fixed_at_construction() {
    let pipe = StreamPipe::new(8).expect("new");
    assert_eq!(pipe.capacity(), 8);

    // Unchanged across the buffer lifecycle.
    let handle = pipe.open(OpenMode::ReadWrite).expect("open");
    handle.write(b"abc").expect("write");
    assert_eq!(pipe.capacity(), 8);
    handle.close();
    assert_eq!(pipe.capacity(), 8);
}

#[test]
fn test_wrap_around_preserves_fifo() {
    let pipe = StreamPipe::new(8).expect("new");
    let writer = pipe.open(OpenMode::Write).expect("open writer");
    let reader = pipe.open(OpenMode::Read).expect("open reader");

    // 5-byte rounds against an 8-byte buffer force a wrap every round.
    for round in 0u8..10 {
        let msg: Vec<u8> = (0..5).map(|i| round * 10 + i).collect();
        write_all(&writer, &msg);
        assert_eq!(read_exact(&reader, 5), msg);
    }
}

#[test]
fn test_single_call_never_wraps() {
    let pipe = StreamPipe::new(8).expect("new");
    let writer = pipe.open(OpenMode::Write).expect("open writer");
    let reader = pipe.open(OpenMode::Read).expect("open reader");

    writer.write(b"ABCDEFG").expect("write");
    let mut buf = [0u8; 16];
    let n = reader.read(&mut buf[..4]).expect("read");
    assert_eq!(&buf[..n], b"ABCD");

    // wpos sits at 7: only 1 byte fits before the physical end, even
    // though 4 slots are logically free.
    assert_eq!(writer.write(b"XYZ").expect("write"), 1);

    // rpos sits at 4: a single read stops at the physical end too.
    let n = reader.read(&mut buf).expect("read");
    assert_eq!(&buf[..n], b"EFGX");
}

#[test]
fn test_interrupted_write_leaves_state_unchanged() {
    let pipe = StreamPipe::new(4).expect("new");
    let writer = pipe.open(OpenMode::Write).expect("open writer");
    let reader = pipe.open(OpenMode::Read).expect("open reader");
    let blocked_writer = pipe.open(OpenMode::Write).expect("open writer 2");

    // Fill the 3 usable slots.
    assert_eq!(writer.write(b"ABC").expect("write"), 3);

    let token = CancelToken::new();
    let thread_token = token.clone();
    let t = thread::spawn(move || blocked_writer.write_cancellable(b"D", &thread_token));

    thread::sleep(Duration::from_millis(100));
    token.cancel();
    assert!(matches!(t.join().expect("join"), Err(DevError::Interrupted)));

    // Buffer contents and positions are exactly as before the blocked call.
    let readiness = reader.poll();
    assert!(readiness.readable);
    assert!(!readiness.writable);
    assert_eq!(read_exact(&reader, 3), b"ABC");
    let mut buf = [0u8; 1];
    assert!(matches!(reader.try_read(&mut buf), Err(DevError::WouldBlock)));
}

#[test]
fn test_interrupted_read_consumes_nothing() {
    let pipe = StreamPipe::new(8).expect("new");
    let writer = pipe.open(OpenMode::Write).expect("open writer");
    let reader = pipe.open(OpenMode::Read).expect("open reader");
    let blocked_reader = pipe.open(OpenMode::Read).expect("open reader 2");

    let token = CancelToken::new();
    let thread_token = token.clone();
    let t = thread::spawn(move || {
        let mut buf = [0u8; 4];
        blocked_reader.read_cancellable(&mut buf, &thread_token)
    });

    thread::sleep(Duration::from_millis(100));
    token.cancel();
    assert!(matches!(t.join().expect("join"), Err(DevError::Interrupted)));

    // Data written afterwards is fully there for the surviving reader.
    writer.write(b"A").expect("write");
    let mut buf = [0u8; 4];
    let n = reader.try_read(&mut buf).expect("read");
    assert_eq!(&buf[..n], b"A");
}

#[test]
fn test_close_all_frees_and_reallocates_fresh() {
    let pipe = StreamPipe::new(8).expect("new");
    let writer = pipe.open(OpenMode::Write).expect("open writer");
    let reader = pipe.open(OpenMode::Read).expect("open reader");

    writer.write(b"AB").expect("write");
    let mut buf = [0u8; 1];
    reader.read(&mut buf).expect("read");

    // Last close frees the buffer (one unread byte is dropped with it).
    writer.close();
    reader.close();

    // Reopening reallocates with positions back at the start, regardless of
    // where the old cursors ended up.
    let writer = pipe.open(OpenMode::Write).expect("reopen writer");
    let reader = pipe.open(OpenMode::Read).expect("reopen reader");
    assert!(!reader.poll().readable);

    // A fresh buffer accepts all 7 usable bytes in one contiguous call.
    assert_eq!(writer.write(b"1234567").expect("write"), 7);
    assert_eq!(read_exact(&reader, 7), b"1234567");
}

struct CountingListener {
    notified: AtomicUsize,
}

impl PipeListener for CountingListener {
    fn data_ready(&self) {
        self.notified.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_listener_fan_out_on_write() {
    let pipe = StreamPipe::new(8).expect("new");
    let writer = pipe.open(OpenMode::Write).expect("open writer");
    let mut reader = pipe.open(OpenMode::Read).expect("open reader");

    let listener = Arc::new(CountingListener { notified: AtomicUsize::new(0) });
    reader.register_listener(listener.clone());

    writer.write(b"a").expect("write");
    writer.write(b"b").expect("write");
    assert_eq!(listener.notified.load(Ordering::SeqCst), 2);

    // Deregistered targets stop receiving notifications.
    reader.unregister_listener();
    writer.write(b"c").expect("write");
    assert_eq!(listener.notified.load(Ordering::SeqCst), 2);
}

#[test]
fn test_listener_deregistered_on_close() {
    let pipe = StreamPipe::new(8).expect("new");
    let writer = pipe.open(OpenMode::Write).expect("open writer");
    let mut reader = pipe.open(OpenMode::Read).expect("open reader");
    // Keep a second reader so the buffer survives the first one's close.
    let reader2 = pipe.open(OpenMode::Read).expect("open reader 2");

    let listener = Arc::new(CountingListener { notified: AtomicUsize::new(0) });
    reader.register_listener(listener.clone());
    reader.close();

    writer.write(b"x").expect("write");
    assert_eq!(listener.notified.load(Ordering::SeqCst), 0);
    drop(reader2);
}

#[test]
fn test_mode_enforcement() {
    let pipe = StreamPipe::new(8).expect("new");
    let writer = pipe.open(OpenMode::Write).expect("open writer");
    let reader = pipe.open(OpenMode::Read).expect("open reader");

    let mut buf = [0u8; 4];
    assert!(matches!(
        writer.try_read(&mut buf),
        Err(DevError::InvalidArgument(_))
    ));
    assert!(matches!(
        reader.try_write(b"x"),
        Err(DevError::InvalidArgument(_))
    ));
}

#[test]
fn test_poll_tracks_buffer_state() {
    let pipe = StreamPipe::new(4).expect("new");
    let handle = pipe.open(OpenMode::ReadWrite).expect("open");

    let r = handle.poll();
    assert!(!r.readable);
    assert!(r.writable);

    handle.write(b"XYZ").expect("write");
    let r = handle.poll();
    assert!(r.readable);
    assert!(!r.writable);

    let mut buf = [0u8; 3];
    handle.read(&mut buf).expect("read");
    let r = handle.poll();
    assert!(!r.readable);
    assert!(r.writable);
}

#[test]
fn test_tiny_capacity_rejected() {
    assert!(matches!(
        StreamPipe::new(1),
        Err(DevError::InvalidArgument(_))
    ));
    assert!(matches!(
        StreamPipe::new(0),
        Err(DevError::InvalidArgument(_))
    ));
}
