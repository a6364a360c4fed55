//! Wire-level constants for the pool-equipment RS-485 protocol.

/// Byte that starts every delimiter pair.
pub const DLE: u8 = 0x10;
/// Second byte of the start-of-frame delimiter.
pub const STX: u8 = 0x02;
/// Second byte of the end-of-frame delimiter.
pub const ETX: u8 = 0x03;
/// Byte inserted after a stuffed `DLE` to disambiguate it from a delimiter.
pub const STUFF_ESCAPE: u8 = 0x00;

/// Smallest legal on-wire frame: header + 1 checksum byte + footer.
pub const MIN_FRAME_LEN: usize = 5;
/// Largest on-wire frame the pending-frame record can hold.
pub const MAX_FRAME_LEN: usize = 32;
/// Smallest legal unstuffed payload (destination/source address + opcode).
pub const MIN_PAYLOAD_LEN: usize = 2;
/// Largest unstuffed payload that is guaranteed to fit [`MAX_FRAME_LEN`] once
/// stuffed, checksummed and delimited.
pub const MAX_PAYLOAD_LEN: usize = 30;

#[rustfmt::skip]
pub mod opcode {
	/// Master -> slave: "are you there?"
	pub const PROBE: u8 = 0x00;
	/// Slave -> master: "yes, I'm here."
	pub const PROBE_REPLY: u8 = 0x01;
}

pub mod timing {
	use core::time::Duration;

	/// How long a slave may stay silent before a request to it is abandoned.
	pub const RESPONSE_DEADLINE: Duration = Duration::from_millis(200);
	/// Minimum silent-line interval between a reply and the next request
	/// (>= 3.5 character times at 9600 baud).
	pub const INTERFRAME_GAP: Duration = Duration::from_millis(4);
	/// Interval between discovery probe sweeps.
	pub const PROBE_TICK: Duration = Duration::from_secs(2);
	/// Nominal interval between round-robin work sweeps.
	pub const WORK_TICK: Duration = Duration::from_millis(500);
	/// Backoff interval used by the work scheduler while the queue is busy.
	pub const WORK_TICK_BACKOFF: Duration = Duration::from_millis(100);
	/// How long a slave may go without any reply before it is marked stale.
	pub const STALENESS_TIMEOUT: Duration = Duration::from_secs(2);
}
