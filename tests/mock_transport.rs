use poolbus::Transport;
use poolbus::error::TransportError;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Standalone mock transport for integration tests, duplicated here rather
/// than reused from the crate's internal test-only mock: the crate does not
/// export test doubles from its public API.
///
/// Inbound/outbound buffers are behind `Arc<Mutex<_>>`, mirroring the
/// `dynamixel2` crate's own serial mock, so a test can hold a handle to feed
/// bytes into (or inspect writes from) a transport that has already been
/// moved into an `Engine`.
#[derive(Default, Clone)]
pub struct MockTransport {
	pub inbound: Arc<Mutex<VecDeque<u8>>>,
	pub written: Arc<Mutex<Vec<u8>>>,
}

impl MockTransport {
	pub fn push_inbound(&self, bytes: &[u8]) {
		self.inbound.lock().unwrap().extend(bytes.iter().copied());
	}

	pub fn take_written(&self) -> Vec<u8> {
		std::mem::take(&mut self.written.lock().unwrap())
	}
}

impl Transport for MockTransport {
	fn read_nonblocking(&mut self, buffer: &mut [u8]) -> Result<usize, TransportError> {
		let mut data = self.inbound.lock().unwrap();
		let len = buffer.len().min(data.len());
		for (slot, byte) in buffer[..len].iter_mut().zip(data.drain(..len)) {
			*slot = byte;
		}
		Ok(len)
	}

	fn write_all(&mut self, buffer: &[u8]) -> Result<(), TransportError> {
		self.written.lock().unwrap().extend_from_slice(buffer);
		Ok(())
	}

	fn discard_input_buffer(&mut self) -> Result<(), TransportError> {
		self.inbound.lock().unwrap().clear();
		Ok(())
	}
}
