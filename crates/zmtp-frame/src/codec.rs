use std::task::{ready, Poll};

use bytes::{Buf, BufMut, BytesMut};
use tracing::debug;
use zmtp_transport::Stream;

use crate::connection::Connection;
use crate::error::{FrameError, Result};
use crate::message::{alloc_buffer, exhausted, Message, MessagePool, MSG_COMMAND, MSG_MORE};
use crate::pool::Handle;

/// Wire flag: more frames follow.
pub const FLAG_MORE: u8 = 0x01;

/// Wire flag: the length field is 8 bytes instead of 1.
pub const FLAG_LARGE: u8 = 0x02;

/// Wire flag: the frame is a command.
pub const FLAG_COMMAND: u8 = 0x04;

/// Largest payload that still fits the 1-byte length form.
pub const SHORT_FRAME_MAX: usize = 255;

/// Flags (1) + long length (8).
pub const MAX_HEADER_SIZE: usize = 9;

/// Default maximum payload size accepted from the wire: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Configuration for frame decoding.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Largest declared payload the receiver will allocate for.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Translate message flags into the wire flags byte for a payload of `size`.
pub fn wire_flags(msg_flags: u8, size: usize) -> u8 {
    let mut flags = 0;
    if msg_flags & MSG_MORE != 0 {
        flags |= FLAG_MORE;
    }
    if msg_flags & MSG_COMMAND != 0 {
        flags |= FLAG_COMMAND;
    }
    if size > SHORT_FRAME_MAX {
        flags |= FLAG_LARGE;
    }
    flags
}

/// Translate a wire flags byte back into message flags.
pub fn message_flags(wire: u8) -> u8 {
    let mut flags = 0;
    if wire & FLAG_MORE != 0 {
        flags |= MSG_MORE;
    }
    if wire & FLAG_COMMAND != 0 {
        flags |= MSG_COMMAND;
    }
    flags
}

/// Header length for a payload of `size` bytes.
pub fn header_len(size: usize) -> usize {
    if size > SHORT_FRAME_MAX {
        MAX_HEADER_SIZE
    } else {
        2
    }
}

/// Encode a frame header.
///
/// ```text
/// ┌───────────┬──────────────────────────────┬─────────────────┐
/// │ Flags (1) │ Length: 1 byte, or 8 bytes BE │ Payload          │
/// │ MORE|LARGE│ when LARGE is set             │ (Length bytes)   │
/// │ |COMMAND  │                               │                  │
/// └───────────┴──────────────────────────────┴─────────────────┘
/// ```
pub fn encode_header(msg_flags: u8, size: usize, dst: &mut BytesMut) {
    let flags = wire_flags(msg_flags, size);
    dst.reserve(header_len(size));
    dst.put_u8(flags);
    if flags & FLAG_LARGE != 0 {
        dst.put_u64(size as u64);
    } else {
        dst.put_u8(size as u8);
    }
}

/// Encode a whole frame (header and payload) into `dst`.
pub fn encode_frame(msg: &Message, dst: &mut BytesMut) {
    encode_header(msg.flags(), msg.size(), dst);
    dst.put_slice(msg.data());
}

/// Decode one frame from an in-memory buffer.
///
/// Returns `Ok(None)` if `src` does not hold a complete frame yet. On success
/// the frame bytes are consumed and the payload becomes an owned message.
pub fn decode_frame(
    src: &mut BytesMut,
    max_payload: usize,
    pool: &mut MessagePool,
) -> Result<Option<Handle<Message>>> {
    let Some(&flags) = src.first() else {
        return Ok(None);
    };
    let len_size = if flags & FLAG_LARGE != 0 { 8 } else { 1 };
    if src.len() < 1 + len_size {
        return Ok(None);
    }

    let declared = if len_size == 8 {
        u64::from_be_bytes(src[1..9].try_into().unwrap_or([0xFF; 8]))
    } else {
        u64::from(src[1])
    };
    let size = check_size(declared, max_payload)?;

    if src.len() < 1 + len_size + size {
        return Ok(None);
    }

    if pool.available() == 0 {
        return Err(exhausted(pool));
    }
    src.advance(1 + len_size);
    let data = src.split_to(size).to_vec();
    Message::from_data(pool, message_flags(flags), data).map(Some)
}

fn check_size(declared: u64, max_payload: usize) -> Result<usize> {
    match usize::try_from(declared) {
        Ok(size) if size <= max_payload => Ok(size),
        _ => Err(FrameError::PayloadTooLarge {
            size: declared,
            max: max_payload,
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendStep {
    Idle,
    Header,
    Payload,
}

/// Resumable frame writer: header, then payload.
///
/// Poll with the same message until it returns `Ready`. The message is only
/// borrowed; the caller still owns and destroys it.
#[derive(Debug)]
pub struct FrameSender {
    step: SendStep,
    header: BytesMut,
}

impl Default for FrameSender {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSender {
    pub fn new() -> Self {
        Self {
            step: SendStep::Idle,
            header: BytesMut::with_capacity(MAX_HEADER_SIZE),
        }
    }

    /// Whether a frame is partially written.
    pub fn in_progress(&self) -> bool {
        self.step != SendStep::Idle
    }

    pub fn poll<S: Stream>(
        &mut self,
        conn: &mut Connection<S>,
        msg: &Message,
    ) -> Poll<Result<()>> {
        loop {
            match self.step {
                SendStep::Idle => {
                    self.header.clear();
                    encode_header(msg.flags(), msg.size(), &mut self.header);
                    self.step = SendStep::Header;
                }
                SendStep::Header => {
                    if let Err(err) = ready!(conn.poll_send(&self.header)) {
                        self.step = SendStep::Idle;
                        return Poll::Ready(Err(err));
                    }
                    self.step = SendStep::Payload;
                }
                SendStep::Payload => {
                    let result = ready!(conn.poll_send(msg.data()));
                    self.step = SendStep::Idle;
                    if result.is_ok() {
                        debug!(size = msg.size(), flags = msg.flags(), "frame sent");
                    }
                    return Poll::Ready(result);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecvStep {
    Flags,
    ShortLength,
    LongLength,
    Payload,
}

/// Resumable frame reader.
///
/// Reads flags, then a 1- or 8-byte length, then the payload straight into a
/// freshly allocated owned buffer. Any failure discards the partial frame.
#[derive(Debug)]
pub struct FrameReceiver {
    step: RecvStep,
    flags: [u8; 1],
    length: [u8; 8],
    payload: Vec<u8>,
    config: FrameConfig,
}

impl Default for FrameReceiver {
    fn default() -> Self {
        Self::new(FrameConfig::default())
    }
}

impl FrameReceiver {
    pub fn new(config: FrameConfig) -> Self {
        Self {
            step: RecvStep::Flags,
            flags: [0],
            length: [0; 8],
            payload: Vec::new(),
            config,
        }
    }

    /// Whether a frame is partially read.
    pub fn in_progress(&self) -> bool {
        self.step != RecvStep::Flags
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    pub fn poll<S: Stream>(
        &mut self,
        conn: &mut Connection<S>,
        pool: &mut MessagePool,
    ) -> Poll<Result<Handle<Message>>> {
        let result = ready!(self.poll_inner(conn, pool));
        if result.is_err() {
            self.reset();
        }
        Poll::Ready(result)
    }

    fn poll_inner<S: Stream>(
        &mut self,
        conn: &mut Connection<S>,
        pool: &mut MessagePool,
    ) -> Poll<Result<Handle<Message>>> {
        loop {
            match self.step {
                RecvStep::Flags => {
                    // Check before consuming anything so the caller can free a
                    // message and retry with the stream untouched.
                    if pool.available() == 0 {
                        return Poll::Ready(Err(exhausted(pool)));
                    }
                    ready!(conn.poll_recv(&mut self.flags))?;
                    self.step = if self.flags[0] & FLAG_LARGE != 0 {
                        RecvStep::LongLength
                    } else {
                        RecvStep::ShortLength
                    };
                }
                RecvStep::ShortLength => {
                    ready!(conn.poll_recv(&mut self.length[..1]))?;
                    self.begin_payload(u64::from(self.length[0]))?;
                }
                RecvStep::LongLength => {
                    ready!(conn.poll_recv(&mut self.length))?;
                    self.begin_payload(u64::from_be_bytes(self.length))?;
                }
                RecvStep::Payload => {
                    ready!(conn.poll_recv(&mut self.payload))?;
                    let data = std::mem::take(&mut self.payload);
                    let flags = message_flags(self.flags[0]);
                    self.step = RecvStep::Flags;
                    debug!(size = data.len(), flags, "frame received");
                    return Poll::Ready(Message::from_data(pool, flags, data));
                }
            }
        }
    }

    fn begin_payload(&mut self, declared: u64) -> Result<()> {
        let size = check_size(declared, self.config.max_payload_size)?;
        self.payload = alloc_buffer(size)?;
        self.step = RecvStep::Payload;
        Ok(())
    }

    fn reset(&mut self) {
        self.step = RecvStep::Flags;
        self.payload = Vec::new();
    }
}

#[cfg(test)]
mod tests {
    use zmtp_transport::{MemoryStream, TransportError};

    use super::*;
    use crate::message::{Reclaimed, MAX_MESSAGES};

    fn drive<T>(mut poll: impl FnMut() -> Poll<Result<T>>) -> Result<T> {
        for _ in 0..100_000 {
            if let Poll::Ready(result) = poll() {
                return result;
            }
        }
        panic!("operation never completed");
    }

    fn roundtrip(flags: u8, payload: Vec<u8>) -> (u8, Vec<u8>) {
        let mut pool = MessagePool::new("messages");
        let (tx, rx) = MemoryStream::pair();
        let mut tx = Connection::new(tx);
        let mut rx = Connection::new(rx);

        let out = Message::from_data(&mut pool, flags, payload).unwrap();
        let mut sender = FrameSender::new();
        drive(|| sender.poll(&mut tx, pool.get(&out).unwrap())).unwrap();
        Message::destroy(&mut pool, out).unwrap();

        let mut receiver = FrameReceiver::default();
        let got = drive(|| receiver.poll(&mut rx, &mut pool)).unwrap();
        let msg = pool.get(&got).unwrap();
        let result = (msg.flags(), msg.data().to_vec());
        assert!(msg.is_owned());
        Message::destroy(&mut pool, got).unwrap();
        result
    }

    #[test]
    fn wire_flag_translation() {
        assert_eq!(wire_flags(0, 0), 0);
        assert_eq!(wire_flags(MSG_MORE, 10), FLAG_MORE);
        assert_eq!(wire_flags(MSG_COMMAND, 10), FLAG_COMMAND);
        assert_eq!(wire_flags(MSG_MORE | MSG_COMMAND, 256), 0x07);
        assert_eq!(message_flags(0x07), MSG_MORE | MSG_COMMAND);
        assert_eq!(message_flags(FLAG_LARGE), 0);
    }

    #[test]
    fn short_header_uses_one_length_byte() {
        let mut buf = BytesMut::new();
        encode_header(MSG_MORE, 255, &mut buf);
        assert_eq!(buf.as_ref(), &[FLAG_MORE, 0xFF]);
        assert_eq!(header_len(255), 2);
    }

    #[test]
    fn large_header_uses_eight_big_endian_bytes() {
        let mut buf = BytesMut::new();
        encode_header(0, 256, &mut buf);
        assert_eq!(buf.as_ref(), &[FLAG_LARGE, 0, 0, 0, 0, 0, 0, 1, 0]);
        assert_eq!(header_len(256), MAX_HEADER_SIZE);
    }

    #[test]
    fn encode_ready_command_frame() {
        let mut pool = MessagePool::new("messages");
        let ready = Message::from_static(&mut pool, MSG_COMMAND, b"\x05READY").unwrap();
        let mut buf = BytesMut::new();
        encode_frame(pool.get(&ready).unwrap(), &mut buf);
        assert_eq!(buf.as_ref(), b"\x04\x06\x05READY");
    }

    #[test]
    fn roundtrip_every_short_size() {
        for size in 0..=SHORT_FRAME_MAX {
            let flags = [0, MSG_MORE, MSG_COMMAND, MSG_MORE | MSG_COMMAND][size % 4];
            let payload: Vec<u8> = (0..size).map(|i| (i * 7 + size) as u8).collect();
            let (got_flags, got) = roundtrip(flags, payload.clone());
            assert_eq!(got_flags, flags, "flags for size {size}");
            assert_eq!(got, payload, "payload for size {size}");
        }
    }

    #[test]
    fn large_frames_use_long_length() {
        for size in [256usize, 257, 1000, 70_000] {
            let payload = vec![0xA5; size];
            let mut pool = MessagePool::new("messages");
            let msg = Message::from_data(&mut pool, MSG_MORE, payload.clone()).unwrap();

            let mut wire = BytesMut::new();
            encode_frame(pool.get(&msg).unwrap(), &mut wire);
            assert_eq!(wire[0] & FLAG_LARGE, FLAG_LARGE);
            assert_eq!(u64::from_be_bytes(wire[1..9].try_into().unwrap()), size as u64);
            assert_eq!(wire.len(), MAX_HEADER_SIZE + size);

            let (flags, got) = roundtrip(MSG_MORE, payload);
            assert_eq!(flags, MSG_MORE);
            assert_eq!(got.len(), size);
        }
    }

    #[test]
    fn consecutive_frames_keep_order() {
        let mut pool = MessagePool::new("messages");
        let (tx, rx) = MemoryStream::pair();
        let mut tx = Connection::new(tx.with_max_chunk(3));
        let mut rx = Connection::new(rx.with_max_chunk(2));

        let first = Message::from_static(&mut pool, MSG_MORE, b"first").unwrap();
        let second = Message::from_static(&mut pool, 0, b"second").unwrap();
        let mut sender = FrameSender::new();
        drive(|| sender.poll(&mut tx, pool.get(&first).unwrap())).unwrap();
        drive(|| sender.poll(&mut tx, pool.get(&second).unwrap())).unwrap();
        Message::destroy(&mut pool, first).unwrap();
        Message::destroy(&mut pool, second).unwrap();

        let mut receiver = FrameReceiver::default();
        let a = drive(|| receiver.poll(&mut rx, &mut pool)).unwrap();
        let b = drive(|| receiver.poll(&mut rx, &mut pool)).unwrap();
        assert_eq!(pool.get(&a).unwrap().data(), b"first");
        assert!(pool.get(&a).unwrap().is_more());
        assert_eq!(pool.get(&b).unwrap().data(), b"second");
        assert!(!pool.get(&b).unwrap().is_more());
    }

    #[test]
    fn decode_from_buffer_handles_partial_input() {
        let mut pool = MessagePool::new("messages");
        let msg = Message::from_static(&mut pool, 0, b"hello").unwrap();
        let mut wire = BytesMut::new();
        encode_frame(pool.get(&msg).unwrap(), &mut wire);
        encode_frame(pool.get(&msg).unwrap(), &mut wire);
        Message::destroy(&mut pool, msg).unwrap();

        let mut partial = BytesMut::from(&wire[..4]);
        assert!(decode_frame(&mut partial, DEFAULT_MAX_PAYLOAD, &mut pool)
            .unwrap()
            .is_none());
        assert_eq!(partial.len(), 4);

        let one = decode_frame(&mut wire, DEFAULT_MAX_PAYLOAD, &mut pool)
            .unwrap()
            .unwrap();
        let two = decode_frame(&mut wire, DEFAULT_MAX_PAYLOAD, &mut pool)
            .unwrap()
            .unwrap();
        assert!(wire.is_empty());
        assert_eq!(pool.get(&one).unwrap().data(), b"hello");
        assert_eq!(pool.get(&two).unwrap().data(), b"hello");
    }

    #[test]
    fn decode_rejects_oversized_declared_length() {
        let mut pool = MessagePool::new("messages");
        let mut wire = BytesMut::new();
        wire.put_u8(FLAG_LARGE);
        wire.put_u64(u64::MAX);
        let err = decode_frame(&mut wire, DEFAULT_MAX_PAYLOAD, &mut pool).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: u64::MAX, .. }));
    }

    #[test]
    fn receiver_rejects_oversized_frame_without_allocating() {
        let mut pool = MessagePool::new("messages");
        let (mut tx, rx) = MemoryStream::pair();
        let mut rx = Connection::new(rx);
        tx.try_send(&[FLAG_LARGE, 0, 0, 0, 0, 0, 0, 0x10, 0]).unwrap();

        let mut receiver = FrameReceiver::new(FrameConfig {
            max_payload_size: 1024,
        });
        let err = drive(|| receiver.poll(&mut rx, &mut pool)).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 4096, max: 1024 }));
        assert!(!receiver.in_progress());
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn receiver_reports_exhaustion_before_reading() {
        let mut pool = MessagePool::new("messages");
        let (mut tx, rx) = MemoryStream::pair();
        let mut rx = Connection::new(rx);
        tx.try_send(b"\x00\x02hi").unwrap();

        let mut live = Vec::new();
        for _ in 0..MAX_MESSAGES {
            live.push(Message::from_static(&mut pool, 0, b"x").unwrap());
        }
        let mut receiver = FrameReceiver::default();
        let err = drive(|| receiver.poll(&mut rx, &mut pool)).unwrap_err();
        assert!(err.is_pool_exhausted());
        assert_eq!(rx.stream().pending_bytes(), 4);

        let freed = live.pop().unwrap();
        assert_eq!(Message::destroy(&mut pool, freed).unwrap(), Reclaimed::Kept);
        let got = drive(|| receiver.poll(&mut rx, &mut pool)).unwrap();
        assert_eq!(pool.get(&got).unwrap().data(), b"hi");
    }

    #[test]
    fn close_mid_frame_discards_partial_frame() {
        let mut pool = MessagePool::new("messages");
        let (mut tx, rx) = MemoryStream::pair();
        let mut rx = Connection::new(rx);
        tx.try_send(b"\x00\x05he").unwrap();

        let mut receiver = FrameReceiver::default();
        assert!(receiver.poll(&mut rx, &mut pool).is_pending());
        assert!(receiver.in_progress());

        tx.close();
        let err = drive(|| receiver.poll(&mut rx, &mut pool)).unwrap_err();
        assert!(matches!(err, FrameError::Transport(TransportError::Closed)));
        assert!(!receiver.in_progress());
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn sender_resumes_after_backpressure() {
        let mut pool = MessagePool::new("messages");
        let (tx, mut peer) = MemoryStream::pair();
        let mut tx = Connection::new(TrickleOnce::new(tx));
        let msg = Message::from_static(&mut pool, 0, b"abc").unwrap();

        let mut sender = FrameSender::new();
        let mut pending = 0;
        loop {
            match sender.poll(&mut tx, pool.get(&msg).unwrap()) {
                Poll::Ready(result) => {
                    result.unwrap();
                    break;
                }
                Poll::Pending => {
                    pending += 1;
                    assert!(sender.in_progress());
                }
            }
        }
        assert!(pending > 0);

        let mut wire = [0u8; 5];
        assert_eq!(peer.try_receive(&mut wire).unwrap(), 5);
        assert_eq!(&wire, b"\x00\x03abc");
    }

    /// Accepts one byte, then refuses the next call.
    struct TrickleOnce {
        inner: MemoryStream,
        ready: bool,
    }

    impl TrickleOnce {
        fn new(inner: MemoryStream) -> Self {
            Self { inner, ready: true }
        }
    }

    impl Stream for TrickleOnce {
        fn try_send(&mut self, data: &[u8]) -> zmtp_transport::Result<usize> {
            let ready = self.ready;
            self.ready = !ready;
            if !ready || data.is_empty() {
                return Ok(0);
            }
            self.inner.try_send(&data[..1])
        }

        fn try_receive(&mut self, buf: &mut [u8]) -> zmtp_transport::Result<usize> {
            self.inner.try_receive(buf)
        }

        fn close(&mut self) {
            self.inner.close()
        }

        fn is_connected(&self) -> bool {
            self.inner.is_connected()
        }
    }
}
