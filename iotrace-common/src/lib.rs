//! # Shared Wire Format (Interceptor ↔ Capture)
//!
//! Defines the fixed-size binary [`Frame`] exchanged between the preloaded
//! interceptor library (producer, lives inside the observed process) and the
//! capture collector (consumer, separate process).
//!
//! ## The Only Protocol Rule
//!
//! There is no framing beyond the record size: the consumer reads exactly
//! [`FRAME_SIZE`] bytes at a time with no length prefix, delimiter or version
//! tag. Both ends must agree on the exact struct layout, field order and enum
//! width. **Any change to the shape of [`Frame`] breaks wire compatibility.**
//!
//! Byte order is host-native on both ends (producer and consumer always run
//! on the same host).
//!
//! ## Key Types
//!
//! - [`Frame`] - One observed file operation (24 bytes, packed)
//! - [`Operation`] - Operation tag carried in [`Frame`]
//!
//! With the `std` feature, [`transport`] adds the named-FIFO channel that
//! carries frames between the two processes.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

#[cfg(feature = "std")]
pub mod transport;

// ============================================================================
// Configuration Names
// ============================================================================

/// Environment variable naming the transport FIFO path
///
/// Read by both the interceptor and the capture process.
pub const FANOUT_ENV: &str = "IOTRACE_FANOUT";

/// Transport FIFO path used when [`FANOUT_ENV`] is unset
pub const DEFAULT_FANOUT: &str = "iotrace.fanout";

/// Environment variable holding the interceptor's basename filter
///
/// When unset, every successful open is traced.
pub const FILENAME_ENV: &str = "IOTRACE_FILENAME";

/// Capacity of the interceptor's traced descriptor set
///
/// Opening more matching files than this at the same time aborts the
/// observed process.
pub const MAX_FILES_TRACED: usize = 64;

// ============================================================================
// Operation Tags
// ============================================================================

/// Operation carried by a [`Frame`]
///
/// Encoded as a 4-byte tag (C `enum` width). All four variants are part of
/// the wire format even though the interceptor currently emits only
/// [`Operation::Open`]; `Read`, `Seek` and `Close` are reserved and must keep
/// their values.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// A traced descriptor was opened
    Open = 0,
    /// Reserved: payload carries the byte count read
    Read = 1,
    /// Reserved: payload carries the signed offset moved
    Seek = 2,
    /// Reserved: no payload
    Close = 3,
}

impl Operation {
    /// Map a raw wire tag back to an operation, `None` for unknown tags
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Open),
            1 => Some(Self::Read),
            2 => Some(Self::Seek),
            3 => Some(Self::Close),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self as u32
    }
}

// ============================================================================
// Frame
// ============================================================================

/// Encoded size of one [`Frame`] in bytes
pub const FRAME_SIZE: usize = 24;

/// One observed file operation, as it travels on the wire
///
/// **Memory Layout**: `#[repr(C, packed)]`, no padding:
///
/// | offset | size | field         |
/// |--------|------|---------------|
/// | 0      | 4    | operation tag |
/// | 4      | 4    | descriptor    |
/// | 8      | 8    | duration (ns) |
/// | 16     | 8    | payload       |
///
/// The payload slot is a union: the read size (`u64`) for
/// [`Operation::Read`], the seek offset (`i64`) for [`Operation::Seek`], and
/// zero for open/close.
///
/// Fields are private because references to packed fields are unaligned;
/// use the accessors, which return copies.
#[repr(C, packed)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Frame {
    op: u32,
    fd: i32,
    duration_ns: i64,
    payload: u64,
}

const _: () = assert!(core::mem::size_of::<Frame>() == FRAME_SIZE);

impl Frame {
    /// Build a frame for an arbitrary raw tag
    ///
    /// Mostly useful for consumers replaying captured streams and for tests;
    /// producers should use the typed constructors.
    #[must_use]
    pub const fn from_parts(op: u32, fd: i32, duration_ns: i64, payload: u64) -> Self {
        Self { op, fd, duration_ns, payload }
    }

    /// A descriptor was opened; `duration_ns` is the time spent in the genuine call
    #[must_use]
    pub const fn open(fd: i32, duration_ns: i64) -> Self {
        Self::from_parts(Operation::Open.as_raw(), fd, duration_ns, 0)
    }

    /// `size` bytes were read from `fd`
    #[must_use]
    pub const fn read(fd: i32, duration_ns: i64, size: u64) -> Self {
        Self::from_parts(Operation::Read.as_raw(), fd, duration_ns, size)
    }

    /// The file position of `fd` moved by `offset` bytes
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub const fn seek(fd: i32, duration_ns: i64, offset: i64) -> Self {
        Self::from_parts(Operation::Seek.as_raw(), fd, duration_ns, offset as u64)
    }

    #[must_use]
    pub const fn close(fd: i32, duration_ns: i64) -> Self {
        Self::from_parts(Operation::Close.as_raw(), fd, duration_ns, 0)
    }

    /// Raw operation tag as found on the wire
    #[must_use]
    pub const fn raw_operation(&self) -> u32 {
        self.op
    }

    /// Decoded operation, `None` when the tag is not a known [`Operation`]
    #[must_use]
    pub const fn operation(&self) -> Option<Operation> {
        Operation::from_raw(self.op)
    }

    #[must_use]
    pub const fn fd(&self) -> i32 {
        self.fd
    }

    #[must_use]
    pub const fn duration_ns(&self) -> i64 {
        self.duration_ns
    }

    /// Raw payload bits, regardless of operation
    #[must_use]
    pub const fn payload(&self) -> u64 {
        self.payload
    }

    /// Byte count of a read frame
    #[must_use]
    pub const fn read_size(&self) -> Option<u64> {
        match self.operation() {
            Some(Operation::Read) => Some(self.payload),
            _ => None,
        }
    }

    /// Signed offset of a seek frame
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn seek_offset(&self) -> Option<i64> {
        match self.operation() {
            Some(Operation::Seek) => Some(self.payload as i64),
            _ => None,
        }
    }

    /// Encode as the raw in-memory representation
    #[must_use]
    #[allow(unsafe_code)]
    pub fn to_bytes(&self) -> [u8; FRAME_SIZE] {
        // SAFETY: Frame is packed plain data without padding, so all
        // FRAME_SIZE bytes are initialized and any byte array is a valid view.
        unsafe { core::mem::transmute::<Frame, [u8; FRAME_SIZE]>(*self) }
    }

    /// Decode from the first [`FRAME_SIZE`] bytes of `bytes`
    ///
    /// Returns `None` only for short input, which consumers treat as end of
    /// stream rather than corruption. Unknown operation tags decode fine.
    #[must_use]
    #[allow(unsafe_code)]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < FRAME_SIZE {
            return None;
        }
        // SAFETY: length checked above; every bit pattern is a valid Frame
        // (integers only) and read_unaligned tolerates any alignment.
        Some(unsafe { core::ptr::read_unaligned(bytes.as_ptr().cast::<Frame>()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_round_trip() {
        let frames = [
            Frame::open(7, 1_250),
            Frame::read(3, 42, u64::MAX),
            Frame::seek(12, -1, -4096),
            Frame::close(-1, i64::MIN),
            Frame::from_parts(99, 5, 10, 0xdead_beef),
        ];
        for frame in frames {
            assert_eq!(Frame::from_bytes(&frame.to_bytes()), Some(frame));
        }
    }

    #[test]
    fn test_wire_layout() {
        let bytes = Frame::read(0x0102_0304, 0x1122_3344_5566_7788, 4096).to_bytes();
        assert_eq!(&bytes[0..4], &1u32.to_ne_bytes());
        assert_eq!(&bytes[4..8], &0x0102_0304i32.to_ne_bytes());
        assert_eq!(&bytes[8..16], &0x1122_3344_5566_7788i64.to_ne_bytes());
        assert_eq!(&bytes[16..24], &4096u64.to_ne_bytes());
    }

    #[test]
    fn test_encoded_size_is_fixed() {
        assert_eq!(Frame::open(1, 0).to_bytes().len(), FRAME_SIZE);
        assert_eq!(Frame::read(1, 0, u64::MAX).to_bytes().len(), FRAME_SIZE);
        assert_eq!(core::mem::size_of::<Frame>(), FRAME_SIZE);
    }

    #[test]
    fn test_short_input_is_end_of_stream() {
        let bytes = Frame::open(3, 9).to_bytes();
        assert_eq!(Frame::from_bytes(&bytes[..FRAME_SIZE - 1]), None);
        assert_eq!(Frame::from_bytes(&[]), None);
    }

    #[test]
    fn test_payload_accessors() {
        assert_eq!(Frame::read(3, 0, 512).read_size(), Some(512));
        assert_eq!(Frame::read(3, 0, 512).seek_offset(), None);
        assert_eq!(Frame::seek(3, 0, -77).seek_offset(), Some(-77));
        assert_eq!(Frame::open(3, 0).payload(), 0);
    }

    #[test]
    fn test_unknown_tag_decodes() {
        let frame = Frame::from_parts(42, 3, 0, 0);
        let decoded = Frame::from_bytes(&frame.to_bytes()).unwrap();
        assert_eq!(decoded.raw_operation(), 42);
        assert_eq!(decoded.operation(), None);
    }

    #[test]
    fn test_operation_tags_are_stable() {
        assert_eq!(Operation::Open.as_raw(), 0);
        assert_eq!(Operation::Read.as_raw(), 1);
        assert_eq!(Operation::Seek.as_raw(), 2);
        assert_eq!(Operation::Close.as_raw(), 3);
        assert_eq!(Operation::from_raw(4), None);
    }
}
