//! Error types for the bus master.
//!
//! One small `struct`/`enum` per failure family, hand-written `Display`,
//! and `From` conversions into the family's parent error rather than a
//! single catch-all enum.

use core::fmt;

/// A frame failed to decode.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FrameError {
	/// Header or footer delimiter bytes did not match `DLE STX` / `DLE ETX`.
	MalformedDelimiter,
	/// The framed byte sequence was shorter than the minimum possible frame.
	TooShort { actual: usize },
	/// The computed checksum did not match the one carried in the frame.
	ChecksumMismatch { expected: u8, computed: u8 },
}

impl fmt::Display for FrameError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::MalformedDelimiter => write!(f, "malformed frame delimiter"),
			Self::TooShort { actual } => write!(f, "frame too short: {} bytes", actual),
			Self::ChecksumMismatch { expected, computed } => {
				write!(f, "checksum mismatch: frame claims {:#04x}, computed {:#04x}", expected, computed)
			},
		}
	}
}

impl std::error::Error for FrameError {}

/// A frame could not be enqueued for transmission.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum EnqueueError {
	/// The framed message exceeds the pending-frame record's capacity.
	OversizedFrame { len: usize },
	/// The queue has no room for another pending frame.
	QueueFull,
}

impl fmt::Display for EnqueueError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::OversizedFrame { len } => write!(f, "frame of {} bytes exceeds the {}-byte limit", len, crate::protocol::MAX_FRAME_LEN),
			Self::QueueFull => write!(f, "transmit queue is full"),
		}
	}
}

impl std::error::Error for EnqueueError {}

/// A transport-level (TTY) failure.
#[derive(Debug)]
pub enum TransportError {
	/// The underlying I/O call failed.
	Io(std::io::Error),
	/// The TTY hit end-of-file; the bus is gone.
	Eof,
}

impl fmt::Display for TransportError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::Io(e) => write!(f, "{}", e),
			Self::Eof => write!(f, "end of file on TTY"),
		}
	}
}

impl std::error::Error for TransportError {}

impl From<std::io::Error> for TransportError {
	fn from(other: std::io::Error) -> Self {
		Self::Io(other)
	}
}

/// Registry insertion failures.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RegistryError {
	/// The address is already occupied.
	AlreadyPresent,
	/// The registry has no free slots.
	Full,
}

impl fmt::Display for RegistryError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::AlreadyPresent => write!(f, "address already present in registry"),
			Self::Full => write!(f, "registry is full"),
		}
	}
}

impl std::error::Error for RegistryError {}

/// Top-level error, for callers (the CLI binary) that just want to `?` out
/// of `main`.
#[derive(Debug)]
pub enum Error {
	Transport(TransportError),
	Enqueue(EnqueueError),
	Registry(RegistryError),
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::Transport(e) => write!(f, "{}", e),
			Self::Enqueue(e) => write!(f, "{}", e),
			Self::Registry(e) => write!(f, "{}", e),
		}
	}
}

impl std::error::Error for Error {}

impl From<TransportError> for Error {
	fn from(other: TransportError) -> Self {
		Self::Transport(other)
	}
}

impl From<EnqueueError> for Error {
	fn from(other: EnqueueError) -> Self {
		Self::Enqueue(other)
	}
}

impl From<RegistryError> for Error {
	fn from(other: RegistryError) -> Self {
		Self::Registry(other)
	}
}
