// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Controller client against a live dispatcher over socket pairs

use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use fusemod_core::Tree;
use fusemod_host::{handlers, DispatchOutcome, Dispatcher, FuseModContext};
use fusemod_proto::{CapabilityFlags, ControlClient, ErrorCode, Event, MAX_FRAME_SIZE};

struct Harness {
    client: ControlClient<UnixStream, UnixStream>,
    ctx: Arc<FuseModContext>,
    dispatcher: JoinHandle<DispatchOutcome>,
}

fn start() -> Harness {
    let (to_host, host_in) = UnixStream::pair().unwrap();
    let (host_out, from_host) = UnixStream::pair().unwrap();

    let ctx = Arc::new(FuseModContext::new(Tree::with_owner(1000, 1000), host_out));
    let dispatcher = {
        let ctx = Arc::clone(&ctx);
        thread::spawn(move || Dispatcher::new(ctx, host_in).run())
    };

    Harness {
        client: ControlClient::new(to_host, from_host),
        ctx,
        dispatcher,
    }
}

impl Harness {
    /// Hang up the inbound stream and collect the dispatcher's outcome.
    fn finish(self) -> DispatchOutcome {
        let (writer, _reader) = self.client.into_parts();
        drop(writer);
        self.dispatcher.join().unwrap()
    }
}

const RW: CapabilityFlags = CapabilityFlags::READABLE.union(CapabilityFlags::WRITABLE);

#[test]
fn test_commands_round_trip() {
    let mut h = start();
    h.client.mkdir("/a").unwrap();
    h.client.mkfile("/a/b", RW).unwrap();
    h.client.set_content("/a/b", "hello").unwrap();
    h.client.append_content("/a/b", " there").unwrap();

    assert_eq!(handlers::read(&h.ctx, b"/a/b", 0, 64).unwrap(), b"hello there");

    h.client.rmfile("/a/b").unwrap();
    h.client.rmdir("/a").unwrap();
    assert_eq!(handlers::getattr(&h.ctx, b"/a"), Err(libc::ENOENT));

    assert_eq!(h.finish(), DispatchOutcome::Finished);
}

#[test]
fn test_failure_status_reaches_client_and_stops_dispatcher() {
    let mut h = start();
    h.client.mkdir("/a").unwrap();
    let err = h.client.mkdir("/a").unwrap_err();
    assert_eq!(err.status_code(), Some(ErrorCode::AlreadyExists));
    assert_eq!(
        h.finish(),
        DispatchOutcome::Fatal {
            code: ErrorCode::AlreadyExists
        }
    );
}

#[test]
fn test_upload_larger_than_a_frame() {
    let mut h = start();
    h.client.mkfile("/big", CapabilityFlags::READABLE).unwrap();

    let data: Vec<u8> = (0..MAX_FRAME_SIZE * 3).map(|i| (i % 253) as u8).collect();
    h.client.upload("/big", &data).unwrap();

    let attrs = handlers::getattr(&h.ctx, b"/big").unwrap();
    assert_eq!(attrs.size, data.len() as u64);
    assert_eq!(handlers::read(&h.ctx, b"/big", 0, data.len() as u32).unwrap(), data);
    assert_eq!(h.finish(), DispatchOutcome::Finished);
}

#[test]
fn test_kernel_write_is_notified_in_chunks() {
    let mut h = start();
    let flags =
        CapabilityFlags::READABLE | CapabilityFlags::WRITABLE | CapabilityFlags::COPY_ON_WRITE;
    h.client.mkfile("/w", flags).unwrap();

    let data: Vec<u8> = (0..7000).map(|i| (i % 200) as u8).collect();
    assert_eq!(handlers::write(&h.ctx, b"/w", &data, 10), Ok(7000));

    // Copy-on-write applied locally, gap zero-filled
    let content = handlers::read(&h.ctx, b"/w", 0, 8000).unwrap();
    assert_eq!(content.len(), 7010);
    assert!(content[..10].iter().all(|b| *b == 0));
    assert_eq!(&content[10..], &data[..]);

    let mut rebuilt = Vec::new();
    let mut next_offset = 10u32;
    while rebuilt.len() < data.len() {
        match h.client.next_event().unwrap() {
            Event::Write(notification) => {
                assert_eq!(notification.path, b"/w");
                assert_eq!(notification.offset, next_offset);
                next_offset += notification.content.len() as u32;
                rebuilt.extend_from_slice(&notification.content);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert_eq!(rebuilt, data);
    assert_eq!(h.finish(), DispatchOutcome::Finished);
}

#[test]
fn test_notifications_interleaved_with_responses_are_kept() {
    let mut h = start();
    h.client.mkfile("/plain", CapabilityFlags::WRITABLE).unwrap();
    assert_eq!(handlers::write(&h.ctx, b"/plain", b"xyz", 0), Ok(3));

    // Not copy-on-write: the tree is untouched but the write is still notified
    assert_eq!(handlers::getattr(&h.ctx, b"/plain").unwrap().size, 0);

    h.client.mkdir("/next").unwrap();
    let notifications = h.client.take_notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].content, b"xyz");
    assert_eq!(notifications[0].offset, 0);
    assert_eq!(h.finish(), DispatchOutcome::Finished);
}

#[test]
fn test_concurrent_kernel_writes_never_interleave_frames() {
    const WRITERS: usize = 3;
    const WRITES_PER_FILE: usize = 4;
    const WRITE_LEN: usize = 7000;

    let mut h = start();
    let flags =
        CapabilityFlags::READABLE | CapabilityFlags::WRITABLE | CapabilityFlags::COPY_ON_WRITE;
    for w in 0..WRITERS {
        h.client.mkfile(format!("/w{w}"), flags).unwrap();
    }

    let expected: Vec<Vec<u8>> = (0..WRITERS)
        .map(|w| {
            (0..WRITE_LEN * WRITES_PER_FILE)
                .map(|i| ((i * 7 + w * 31) % 256) as u8)
                .collect()
        })
        .collect();

    let writers: Vec<_> = expected
        .iter()
        .enumerate()
        .map(|(w, data)| {
            let ctx = Arc::clone(&h.ctx);
            let data = data.clone();
            thread::spawn(move || {
                let path = format!("/w{w}");
                for (k, piece) in data.chunks(WRITE_LEN).enumerate() {
                    let offset = (k * WRITE_LEN) as i64;
                    assert_eq!(
                        handlers::write(&ctx, path.as_bytes(), piece, offset),
                        Ok(WRITE_LEN as u32)
                    );
                }
            })
        })
        .collect();

    // Keep the dispatcher busy while the writers run; each response drains
    // whatever notifications were queued ahead of it.
    let mut n = 0;
    while !writers.iter().all(|w| w.is_finished()) {
        h.client.mkdir(format!("/n{n}")).unwrap();
        n += 1;
    }
    for writer in writers {
        writer.join().unwrap();
    }
    // Everything the writers sent precedes this response
    h.client.mkdir("/done").unwrap();

    let mut rebuilt: Vec<Vec<u8>> = vec![Vec::new(); WRITERS];
    for notification in h.client.take_notifications() {
        let path = String::from_utf8(notification.path).unwrap();
        let w: usize = path.trim_start_matches("/w").parse().unwrap();
        assert_eq!(notification.offset as usize, rebuilt[w].len(), "{path} out of order");
        rebuilt[w].extend_from_slice(&notification.content);
    }
    for w in 0..WRITERS {
        assert_eq!(rebuilt[w], expected[w]);
        let path = format!("/w{w}");
        let content = handlers::read(&h.ctx, path.as_bytes(), 0, u32::MAX).unwrap();
        assert_eq!(content, expected[w]);
    }
    assert_eq!(h.finish(), DispatchOutcome::Finished);
}
