//! The byte source/sink the engine drives, and the real TTY implementation.
//!
//! Mirrors the shape of the `dynamixel2` crate's own `SerialPort`/`Transport`
//! traits: a narrow trait the engine programs against, plus one concrete
//! implementation backed by `serial2`. Tests substitute an in-memory mock
//! instead of opening a real device (see `tests/`).

use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use crate::error::TransportError;

/// The byte source/sink the engine drives. The real implementation is a
/// `/dev/tty*` opened in RS-485 mode; tests use an in-memory ring buffer.
pub trait Transport {
	/// Non-blocking read: returns `0` if nothing is available right now
	/// rather than blocking, matching the reactor's edge-triggered
	/// readiness model.
	fn read_nonblocking(&mut self, buffer: &mut [u8]) -> Result<usize, TransportError>;

	/// Write the full buffer to the wire before returning.
	fn write_all(&mut self, buffer: &[u8]) -> Result<(), TransportError>;

	/// Discard any buffered, unread input. Called once at startup.
	fn discard_input_buffer(&mut self) -> Result<(), TransportError>;
}

/// A `Transport` that also exposes a raw fd, for reactor registration. Split
/// from `Transport` itself so in-memory mocks (which have no fd) can still
/// implement the base trait.
pub trait AsTransportFd {
	fn as_raw_fd(&self) -> RawFd;
}

/// Real TTY transport, backed by `serial2` with a Linux RS-485 `ioctl` on
/// top.
pub struct TtyTransport {
	port: serial2::SerialPort,
}

impl TtyTransport {
	/// Open `path` at `baud_rate`, configure 8N1, non-blocking reads, and
	/// attempt to enable RS-485 mode (RTS-on-send). Failure to enable
	/// RS-485 mode is logged as a warning, not fatal: some USB-RS485
	/// adapters do this in hardware and don't expose the ioctl.
	pub fn open(path: impl AsRef<std::path::Path>, baud_rate: u32) -> Result<Self, TransportError> {
		// `serial2::SerialPort::open` already configures 8N1, no flow control.
		let mut port = serial2::SerialPort::open(path.as_ref(), baud_rate)?;
		port.set_read_timeout(Duration::from_millis(0))?;
		port.discard_input_buffer()?;

		if let Err(error) = enable_rs485(port.as_raw_fd()) {
			warn!("could not enable RS-485 mode on {}: {}", path.as_ref().display(), error);
		}

		Ok(Self { port })
	}
}

impl Transport for TtyTransport {
	fn read_nonblocking(&mut self, buffer: &mut [u8]) -> Result<usize, TransportError> {
		match serial2::SerialPort::read(&mut self.port, buffer) {
			Ok(0) => Err(TransportError::Eof),
			Ok(n) => Ok(n),
			Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => Ok(0),
			Err(e) => Err(TransportError::Io(e)),
		}
	}

	fn write_all(&mut self, buffer: &[u8]) -> Result<(), TransportError> {
		serial2::SerialPort::write_all(&mut self.port, buffer)?;
		Ok(())
	}

	fn discard_input_buffer(&mut self) -> Result<(), TransportError> {
		serial2::SerialPort::discard_input_buffer(&mut self.port)?;
		Ok(())
	}
}

impl AsTransportFd for TtyTransport {
	fn as_raw_fd(&self) -> RawFd {
		self.port.as_raw_fd()
	}
}

impl std::fmt::Debug for TtyTransport {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		f.debug_struct("TtyTransport").finish_non_exhaustive()
	}
}

#[cfg(target_os = "linux")]
fn enable_rs485(fd: RawFd) -> std::io::Result<()> {
	const SER_RS485_ENABLED: u32 = 1 << 0;
	const SER_RS485_RTS_ON_SEND: u32 = 1 << 1;

	#[repr(C)]
	#[derive(Default)]
	struct SerialRs485 {
		flags: u32,
		delay_rts_before_send: u32,
		delay_rts_after_send: u32,
		padding: [u32; 5],
	}

	const TIOCSRS485: libc::c_ulong = 0x542f;

	let mut conf = SerialRs485 { flags: SER_RS485_ENABLED | SER_RS485_RTS_ON_SEND, ..Default::default() };
	let rc = unsafe { libc::ioctl(fd, TIOCSRS485, &mut conf as *mut SerialRs485) };
	if rc != 0 {
		return Err(std::io::Error::last_os_error());
	}
	Ok(())
}

#[cfg(not(target_os = "linux"))]
fn enable_rs485(_fd: RawFd) -> std::io::Result<()> {
	Err(std::io::Error::new(std::io::ErrorKind::Unsupported, "RS-485 mode configuration is only implemented on Linux"))
}
