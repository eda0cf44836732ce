use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use satsink_frame::{decode_frame, encode_packet, ChannelType, FrameReader, Pdu};
use satsink_pipeline::{Pipeline, PipelineConfig, ProtocolVersion};

#[derive(Clone, Default)]
struct Shared(Arc<Mutex<Vec<u8>>>);

impl Shared {
    fn bytes(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl Write for Shared {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Blocks every write until the gate opens.
#[derive(Clone, Default)]
struct Gated {
    open: Arc<(Mutex<bool>, Condvar)>,
    out: Shared,
}

impl Gated {
    fn release(&self) {
        let (lock, cvar) = &*self.open;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }
}

impl Write for Gated {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let (lock, cvar) = &*self.open;
        let mut open = lock.lock().unwrap();
        while !*open {
            open = cvar.wait(open).unwrap();
        }
        drop(open);
        self.out.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn packet(channel: ChannelType, more: bool, payload: &[u8]) -> Pdu {
    let mut buf = BytesMut::new();
    encode_packet(channel, more, payload, &mut buf);
    Pdu::Bytes(buf.freeze())
}

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/satsink-e2e-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

#[test]
fn demultiplexes_into_both_sinks() {
    let bulk = Shared::default();
    let user = Shared::default();
    let (mut dispatcher, handle) = Pipeline::new(PipelineConfig::default())
        .with_bulk_sink(bulk.clone())
        .with_user_sink(user.clone())
        .start()
        .unwrap();

    dispatcher.deliver(packet(ChannelType::Bulk, false, b"\x01\x02\x03"));
    dispatcher.deliver(packet(ChannelType::UserFragment, true, b"ABC"));
    dispatcher.deliver(packet(ChannelType::Bulk, false, b"\x04"));
    dispatcher.deliver(packet(ChannelType::UserFragment, false, b"DEF"));
    dispatcher.deliver(Pdu::Bytes(Bytes::from_static(b"\x00\x01")));
    dispatcher.deliver(packet(ChannelType::UserFragment, false, b"second"));

    let summary = handle.finish().unwrap();

    assert_eq!(bulk.bytes(), b"\x01\x02\x03\x04");
    let mut wire = BytesMut::from(user.bytes().as_slice());
    let first = decode_frame(&mut wire, usize::MAX).unwrap().unwrap();
    let second = decode_frame(&mut wire, usize::MAX).unwrap().unwrap();
    assert_eq!(first.payload.as_ref(), b"ABCDEF");
    assert_eq!(second.payload.as_ref(), b"second");
    assert!(wire.is_empty());

    assert_eq!(dispatcher.totals().bulk, 4);
    assert_eq!(dispatcher.totals().user, 12);
    assert_eq!(dispatcher.rejected(), 1);
    assert_eq!(summary.bulk.unwrap().delivered_messages, 2);
    assert_eq!(summary.user.unwrap().delivered_messages, 2);
}

#[test]
fn slow_sink_loses_oldest_data() {
    let gated = Gated::default();
    let config = PipelineConfig {
        buffer_capacity: 1000,
        user_enabled: false,
        ..PipelineConfig::default()
    };
    let (mut dispatcher, handle) = Pipeline::new(config)
        .with_bulk_sink(gated.clone())
        .start()
        .unwrap();
    let buffer = handle.buffer(ChannelType::Bulk).unwrap().clone();

    dispatcher.deliver(packet(ChannelType::Bulk, false, &[0u8; 10]));
    let deadline = Instant::now() + Duration::from_secs(5);
    while !buffer.is_empty() {
        assert!(Instant::now() < deadline, "worker never picked up the first blob");
        thread::sleep(Duration::from_millis(5));
    }

    for fill in 1..=3u8 {
        dispatcher.deliver(packet(ChannelType::Bulk, false, &[fill; 400]));
    }
    assert_eq!(buffer.total_bytes(), 800);
    assert_eq!(buffer.take_dropped(), Some(400));

    gated.release();
    let summary = handle.finish().unwrap();

    let out = gated.out.bytes();
    assert_eq!(out.len(), 810);
    assert!(out[..10].iter().all(|&b| b == 0));
    assert!(out[10..410].iter().all(|&b| b == 2));
    assert!(out[410..].iter().all(|&b| b == 3));
    assert_eq!(summary.bulk.unwrap().delivered_bytes, 810);
    assert_eq!(dispatcher.totals().bulk, 1210);
}

#[test]
fn shutdown_is_prompt_when_idle() {
    let config = PipelineConfig {
        user_enabled: false,
        ..PipelineConfig::default()
    };
    let (_dispatcher, handle) = Pipeline::new(config)
        .with_bulk_sink(Shared::default())
        .start()
        .unwrap();

    let started = Instant::now();
    let summary = handle.shutdown().unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(summary.bulk.unwrap().delivered_messages, 0);
}

#[cfg(target_os = "linux")]
#[test]
fn shutdown_is_prompt_with_stalled_fifo_reader() {
    use satsink_transport::{Endpoint, SinkTarget};
    use tokio_util::sync::CancellationToken;

    let dir = unique_temp_dir("stalled");
    let path = dir.join("bulk");
    let endpoint = Endpoint::new(SinkTarget::Fifo(path.clone())).unwrap();
    // Opened read-write so the open does not wait for a writer; never read.
    let _reader = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .unwrap();

    let token = CancellationToken::new();
    let config = PipelineConfig {
        user_enabled: false,
        ..PipelineConfig::default()
    };
    let (mut dispatcher, handle) = Pipeline::new(config)
        .with_cancellation(token.clone())
        .with_bulk_sink(endpoint.with_cancellation(token))
        .start()
        .unwrap();
    let buffer = handle.buffer(ChannelType::Bulk).unwrap().clone();

    for _ in 0..8 {
        dispatcher.deliver(packet(ChannelType::Bulk, false, &[0u8; 64 * 1024]));
    }
    // The pipe holds one blob; the worker blocks on a later one.
    let deadline = Instant::now() + Duration::from_secs(5);
    while buffer.len() > 6 {
        assert!(Instant::now() < deadline, "worker never reached the full pipe");
        thread::sleep(Duration::from_millis(5));
    }
    thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    let summary = handle.shutdown().unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(summary.stalled.is_empty());
    let bulk = summary.bulk.unwrap();
    assert!(bulk.failed_writes >= 1);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn legacy_protocol_copies_packets() {
    let bulk = Shared::default();
    let config = PipelineConfig {
        protocol_version: ProtocolVersion::Legacy,
        ..PipelineConfig::default()
    };
    let (mut dispatcher, handle) = Pipeline::new(config)
        .with_bulk_sink(bulk.clone())
        .start()
        .unwrap();

    dispatcher.deliver(Pdu::Bytes(Bytes::from_static(b"\x01")));
    dispatcher.deliver(Pdu::Bytes(Bytes::from_static(b"raw packet")));
    let summary = handle.finish().unwrap();

    assert_eq!(bulk.bytes(), b"\x01raw packet");
    assert!(summary.user.is_none());
}

#[cfg(unix)]
#[test]
fn user_stream_over_unix_socket() {
    use satsink_transport::{Endpoint, SinkTarget, UnixDomainSocket};

    let dir = unique_temp_dir("uds");
    let sock_path = dir.join("user.sock");
    let listener = UnixDomainSocket::bind(&sock_path).unwrap();

    let reader = thread::spawn(move || {
        let stream = listener.accept().unwrap();
        let mut frames = FrameReader::new(stream);
        let mut messages = Vec::new();
        while let Ok(frame) = frames.read_frame() {
            messages.push(frame.payload);
        }
        messages
    });

    let config = PipelineConfig {
        bulk_enabled: false,
        ..PipelineConfig::default()
    };
    let endpoint = Endpoint::new(SinkTarget::Unix(sock_path.clone())).unwrap();
    let (mut dispatcher, handle) = Pipeline::new(config)
        .with_user_sink(endpoint)
        .start()
        .unwrap();

    dispatcher.deliver(packet(ChannelType::UserFragment, true, b"hello, "));
    dispatcher.deliver(packet(ChannelType::UserFragment, false, b"world"));
    dispatcher.deliver(packet(ChannelType::Bulk, false, b"ignored"));
    handle.finish().unwrap();

    let messages = reader.join().unwrap();
    assert_eq!(messages, vec![Bytes::from_static(b"hello, world")]);
    assert_eq!(dispatcher.totals().bulk, 0);
    let _ = std::fs::remove_dir_all(&dir);
}

#[cfg(unix)]
#[test]
fn file_sink_appends_raw_blocks() {
    use satsink_transport::{Endpoint, SinkTarget};

    let dir = unique_temp_dir("file");
    let path = dir.join("blocks.bin");
    std::fs::write(&path, b"existing|").unwrap();

    let endpoint = Endpoint::new(SinkTarget::File(path.clone())).unwrap();
    let config = PipelineConfig {
        user_enabled: false,
        ..PipelineConfig::default()
    };
    let (mut dispatcher, handle) = Pipeline::new(config)
        .with_bulk_sink(endpoint)
        .start()
        .unwrap();
    dispatcher.deliver(packet(ChannelType::Bulk, false, b"block-1|"));
    dispatcher.deliver(packet(ChannelType::Bulk, false, b"block-2"));
    handle.finish().unwrap();

    let mut contents = Vec::new();
    std::fs::File::open(&path)
        .unwrap()
        .read_to_end(&mut contents)
        .unwrap();
    assert_eq!(contents, b"existing|block-1|block-2");
    let _ = std::fs::remove_dir_all(&dir);
}

#[cfg(unix)]
#[test]
fn timed_out_user_write_leaves_decodable_stream() {
    use std::sync::mpsc;

    use satsink_transport::{Endpoint, SinkTarget, UnixDomainSocket};

    let dir = unique_temp_dir("timeout");
    let sock_path = dir.join("user.sock");
    let listener = UnixDomainSocket::bind(&sock_path).unwrap();

    // The consumer holds off reading until told to.
    let (go, wait_for_go) = mpsc::channel::<()>();
    let consumer = thread::spawn(move || {
        wait_for_go.recv().unwrap();
        let mut complete = Vec::new();
        loop {
            let mut stream = listener.accept().unwrap();
            let mut raw = Vec::new();
            stream.read_to_end(&mut raw).unwrap();
            let mut wire = BytesMut::from(raw.as_slice());
            while let Some(frame) = decode_frame(&mut wire, usize::MAX).unwrap() {
                complete.push(frame.payload);
            }
            if complete.last().is_some_and(|p| p.as_ref() == b"done") {
                return complete;
            }
        }
    });

    let endpoint = Endpoint::new(SinkTarget::Unix(sock_path.clone()))
        .unwrap()
        .with_write_timeout(Some(Duration::from_millis(100)));
    let config = PipelineConfig {
        bulk_enabled: false,
        ..PipelineConfig::default()
    };
    let (mut dispatcher, handle) = Pipeline::new(config)
        .with_user_sink(endpoint)
        .start()
        .unwrap();
    let buffer = handle.buffer(ChannelType::UserFragment).unwrap().clone();

    let mut sent = Vec::new();
    for fill in 1..=6u8 {
        let message = vec![fill; 300 * 1024];
        dispatcher.deliver(packet(ChannelType::UserFragment, false, &message));
        sent.push(message);
    }
    let deadline = Instant::now() + Duration::from_secs(10);
    while !buffer.is_empty() {
        assert!(Instant::now() < deadline, "worker never drained the backlog");
        thread::sleep(Duration::from_millis(10));
    }
    thread::sleep(Duration::from_millis(300));

    go.send(()).unwrap();
    for fill in 0xa1..=0xa3u8 {
        let message = vec![fill; 20 * 1024];
        dispatcher.deliver(packet(ChannelType::UserFragment, false, &message));
        sent.push(message);
    }
    dispatcher.deliver(packet(ChannelType::UserFragment, false, b"done"));
    sent.push(b"done".to_vec());
    let summary = handle.finish().unwrap();
    let complete = consumer.join().unwrap();

    for payload in &complete {
        assert!(sent.iter().any(|m| m.as_slice() == payload.as_ref()));
    }
    let tail: Vec<&[u8]> = complete[complete.len() - 4..]
        .iter()
        .map(|p| p.as_ref())
        .collect();
    let expected: Vec<&[u8]> = sent[6..].iter().map(Vec::as_slice).collect();
    assert_eq!(tail, expected);

    let user = summary.user.unwrap();
    assert_eq!(user.delivered_messages, complete.len() as u64);
    assert_eq!(user.delivered_messages + user.failed_writes, 10);
    let _ = std::fs::remove_dir_all(&dir);
}
