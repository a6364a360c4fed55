//! The master engine: wires the codec, scanner, transmit queue and slave
//! registry together into the state machine described by the component
//! design. This is the reactor's only tenant — `on_readable`/`on_timer` are
//! plain methods that never touch `mio`, so the state machine can be driven
//! from tests without a real TTY or a real reactor tick.

use std::time::Instant;

use crate::codec;
use crate::error::{Error, RegistryError};
use crate::protocol::{self, timing};
use crate::queue::{DEFAULT_QUEUE_CAPACITY, TransmitQueue};
use crate::reactor::Reactor;
use crate::registry::{DEFAULT_CAPACITY, Registry, SlaveHandlers};
use crate::scanner::{self, ScanOutcome};
use crate::transport::{AsTransportFd, Transport};

/// Identifies one of the engine's four timers to the reactor.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum TimerKind {
	ProbeTick,
	WorkTick,
	ResponseDeadline,
	InterframeGap,
}

/// The bus-mastering state machine. Owns the TTY (via `T: Transport`)
/// exclusively for its whole lifetime, per the resource policy: nothing
/// else is allowed to read or write it.
pub struct Engine<T: Transport, const N: usize = DEFAULT_CAPACITY> {
	transport: T,
	registry: Registry<N>,
	queue: TransmitQueue,
	read_buffer: Vec<u8>,
	probe_interval: std::time::Duration,
	work_interval: std::time::Duration,
}

impl<T: Transport, const N: usize> Engine<T, N> {
	pub fn new(transport: T) -> Self {
		Self {
			transport,
			registry: Registry::new(),
			queue: TransmitQueue::new(DEFAULT_QUEUE_CAPACITY),
			read_buffer: Vec::with_capacity(128),
			probe_interval: timing::PROBE_TICK,
			work_interval: timing::WORK_TICK,
		}
	}

	/// Override the nominal probe-sweep and work-sweep intervals (default
	/// 2 s / 500 ms). Intended for bench testing against a non-production
	/// bus; call before [`Self::start`].
	pub fn set_intervals(&mut self, probe_interval: std::time::Duration, work_interval: std::time::Duration) {
		self.probe_interval = probe_interval;
		self.work_interval = work_interval;
	}

	/// Administratively register a slave. Per the bus convention, addresses
	/// are only ever added, never removed at runtime.
	pub fn add_slave(&mut self, address: u8, handlers: Box<dyn SlaveHandlers>) -> Result<(), RegistryError> {
		self.registry.add(address, handlers)
	}

	pub fn registry(&self) -> &Registry<N> {
		&self.registry
	}

	/// Arm the two periodic timers. Call once at startup, before the first
	/// `reactor.poll`.
	pub fn start(&mut self, reactor: &mut Reactor<TimerKind>) {
		let now = Instant::now();
		reactor.schedule(TimerKind::ProbeTick, now + self.probe_interval);
		reactor.schedule(TimerKind::WorkTick, now + self.work_interval);
	}

	/// The TTY is readable: drain it, scan out any complete frames, and
	/// dispatch each one.
	pub fn on_readable(&mut self, reactor: &mut Reactor<TimerKind>) -> Result<(), Error> {
		let mut chunk = [0u8; 128];
		loop {
			let n = self.transport.read_nonblocking(&mut chunk)?;
			if n == 0 {
				break;
			}
			self.read_buffer.extend_from_slice(&chunk[..n]);
		}
		self.drain_frames(reactor);
		Ok(())
	}

	/// One of the engine's timers elapsed.
	pub fn on_timer(&mut self, kind: TimerKind, reactor: &mut Reactor<TimerKind>) -> Result<(), Error> {
		match kind {
			TimerKind::ProbeTick => self.on_probe_tick(reactor),
			TimerKind::WorkTick => self.on_work_tick(reactor),
			TimerKind::ResponseDeadline => self.on_response_deadline_elapsed(reactor),
			TimerKind::InterframeGap => self.on_interframe_gap_elapsed(reactor),
		}
	}

	fn drain_frames(&mut self, reactor: &mut Reactor<TimerKind>) {
		loop {
			match scanner::scan(&self.read_buffer) {
				ScanOutcome::NeedMoreData { garbage } => {
					if garbage > 0 {
						debug!("skipping {} bytes of leading garbage", garbage);
						self.read_buffer.drain(..garbage);
					}
					break;
				},
				ScanOutcome::Frame { garbage, len } => {
					if garbage > 0 {
						debug!("skipping {} bytes of leading garbage", garbage);
					}
					let end = garbage + len;
					let mut framed: Vec<u8> = self.read_buffer[garbage..end].to_vec();
					self.read_buffer.drain(..end);
					self.on_frame_received(&mut framed, reactor);
				},
			}
		}
	}

	/// Route one complete, delimited frame. Whether it parses cleanly or
	/// not, if it was positionally attributed to an in-flight request the
	/// transaction advances — the reply was expected even if it turned out
	/// unreadable.
	fn on_frame_received(&mut self, framed: &mut [u8], reactor: &mut Reactor<TimerKind>) {
		let in_flight_destination = match self.queue.head() {
			Some(head) if head.is_transmitted() => Some(head.destination()),
			_ => None,
		};

		let Some(destination) = in_flight_destination else {
			match codec::parse(framed) {
				Ok(_) => warn!("discarding unsolicited frame"),
				Err(e) => warn!("discarding unsolicited, unparseable frame: {}", e),
			}
			return;
		};

		reactor.cancel(TimerKind::ResponseDeadline);

		match codec::parse(framed) {
			Ok(payload) => self.complete_transaction(destination, payload),
			Err(e) => warn!("dropping malformed reply from slave {:#04x}: {}", destination, e),
		}

		self.queue.pop_head();
		reactor.schedule(TimerKind::InterframeGap, Instant::now() + timing::INTERFRAME_GAP);
	}

	fn complete_transaction(&mut self, destination: u8, payload: &[u8]) {
		self.registry.mark_alive(destination, Instant::now());

		if payload.get(1) == Some(&protocol::opcode::PROBE_REPLY) {
			self.registry.invoke_on_probe_reply(destination);
		} else {
			self.registry.dispatch_reply(destination, payload);
		}
	}

	fn on_response_deadline_elapsed(&mut self, reactor: &mut Reactor<TimerKind>) -> Result<(), Error> {
		if let Some(frame) = self.queue.pop_head() {
			warn!("response timeout waiting for slave {:#04x}", frame.destination());
		}
		// No interframe gap on timeout: no bus traffic occurred, so the next
		// head may go out immediately.
		self.try_transmit_head(reactor)
	}

	fn on_interframe_gap_elapsed(&mut self, reactor: &mut Reactor<TimerKind>) -> Result<(), Error> {
		self.try_transmit_head(reactor)
	}

	fn on_probe_tick(&mut self, reactor: &mut Reactor<TimerKind>) -> Result<(), Error> {
		self.registry.sweep_staleness(Instant::now());

		let mut disconnected = Vec::new();
		self.registry.for_each_occupied_mut(|address, connected, _handlers| {
			if !connected {
				disconnected.push(address);
			}
		});
		for address in disconnected {
			self.enqueue_request(address, &[address, protocol::opcode::PROBE], reactor)?;
		}

		reactor.schedule(TimerKind::ProbeTick, Instant::now() + self.probe_interval);
		Ok(())
	}

	fn on_work_tick(&mut self, reactor: &mut Reactor<TimerKind>) -> Result<(), Error> {
		self.registry.sweep_staleness(Instant::now());

		if !self.queue.is_empty() {
			reactor.schedule(TimerKind::WorkTick, Instant::now() + timing::WORK_TICK_BACKOFF);
			return Ok(());
		}

		let mut requests: Vec<(u8, Vec<u8>)> = Vec::new();
		self.registry.for_each_occupied_mut(|address, _connected, handlers| {
			let mut buf = [0u8; protocol::MAX_PAYLOAD_LEN];
			if let Some(len) = handlers.get_next_request(&mut buf) {
				requests.push((address, buf[..len].to_vec()));
			}
		});
		for (address, mut payload) in requests {
			if !payload.is_empty() {
				payload[0] = address;
			}
			self.enqueue_request(address, &payload, reactor)?;
		}

		reactor.schedule(TimerKind::WorkTick, Instant::now() + self.work_interval);
		Ok(())
	}

	/// Frame `payload` and append it to the transmit queue, attributing the
	/// eventual reply to `destination`. Transmits immediately if the queue
	/// was idle and no interframe gap is pending.
	fn enqueue_request(&mut self, destination: u8, payload: &[u8], reactor: &mut Reactor<TimerKind>) -> Result<(), Error> {
		let mut framed = vec![0u8; codec::maximum_framed_len(payload.len())];
		let len = codec::build(payload, &mut framed);
		framed.truncate(len);

		let was_idle = self.queue.is_empty();
		self.queue.enqueue(destination, &framed).map_err(|e| {
			warn!("failed to enqueue request for slave {:#04x}: {}", destination, e);
			e
		})?;

		if was_idle && !reactor.is_scheduled(TimerKind::InterframeGap) {
			self.try_transmit_head(reactor)?;
		}
		Ok(())
	}

	fn try_transmit_head(&mut self, reactor: &mut Reactor<TimerKind>) -> Result<(), Error> {
		let bytes = match self.queue.head() {
			Some(frame) if !frame.is_transmitted() => frame.bytes().to_vec(),
			_ => return Ok(()),
		};

		self.transport.write_all(&bytes)?;
		self.queue.head_mut().expect("head checked above").mark_transmitted();
		reactor.schedule(TimerKind::ResponseDeadline, Instant::now() + timing::RESPONSE_DEADLINE);
		Ok(())
	}
}

impl<T: Transport + AsTransportFd, const N: usize> Engine<T, N> {
	/// The transport's raw fd, for registering with a [`Reactor`].
	pub fn raw_fd(&self) -> std::os::unix::io::RawFd {
		self.transport.as_raw_fd()
	}
}

impl<T: Transport, const N: usize> std::fmt::Debug for Engine<T, N> {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		f.debug_struct("Engine").field("registry", &self.registry).field("queued", &self.queue.len()).finish_non_exhaustive()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::transport::test::MockTransport;
	use assert2::assert;
	use std::collections::VecDeque;

	struct CountingSlave {
		probe_replies: usize,
		replies: Vec<Vec<u8>>,
		next_request: Option<Vec<u8>>,
	}

	impl CountingSlave {
		fn new() -> Self {
			Self { probe_replies: 0, replies: Vec::new(), next_request: None }
		}
	}

	impl SlaveHandlers for CountingSlave {
		fn on_reply(&mut self, payload: &[u8]) {
			self.replies.push(payload.to_vec());
		}

		fn get_next_request(&mut self, out: &mut [u8]) -> Option<usize> {
			let request = self.next_request.take()?;
			out[..request.len()].copy_from_slice(&request);
			Some(request.len())
		}

		fn on_probe_reply(&mut self) {
			self.probe_replies += 1;
		}
	}

	fn new_engine() -> Engine<MockTransport, 4> {
		Engine::new(MockTransport::default())
	}

	#[test]
	fn test_s5_probe_cycle_marks_connected_and_stops_reprobing() {
		let mut engine = new_engine();
		engine.add_slave(0x68, Box::new(CountingSlave::new())).unwrap();
		let mut reactor: Reactor<TimerKind> = Reactor::new().unwrap();
		engine.start(&mut reactor);

		engine.on_probe_tick(&mut reactor).unwrap();
		assert!(engine.transport.written == vec![0x10, 0x02, 0x68, 0x00, 0x7a, 0x10, 0x03]);
		assert!(!engine.registry.is_connected(0x68));

		let mut reply = codec_vec(&[0x68, 0x01]);
		engine.transport.inbound.extend(reply.drain(..));
		engine.on_readable(&mut reactor).unwrap();

		assert!(engine.registry.is_connected(0x68));

		engine.transport.written.clear();
		engine.on_probe_tick(&mut reactor).unwrap();
		assert!(engine.transport.written.is_empty());
	}

	#[test]
	fn test_s6_response_timeout_advances_to_next_head() {
		let mut engine = new_engine();
		engine.add_slave(0x10, Box::new(CountingSlave::new())).unwrap();
		engine.add_slave(0x20, Box::new(CountingSlave::new())).unwrap();
		let mut reactor: Reactor<TimerKind> = Reactor::new().unwrap();

		engine.enqueue_request(0x10, &[0x10, 0x00], &mut reactor).unwrap();
		engine.enqueue_request(0x20, &[0x20, 0x00], &mut reactor).unwrap();
		assert!(engine.queue.len() == 2);
		assert!(reactor.is_scheduled(TimerKind::ResponseDeadline));

		engine.transport.written.clear();
		engine.on_timer(TimerKind::ResponseDeadline, &mut reactor).unwrap();

		assert!(engine.queue.len() == 1);
		assert!(engine.queue.head().unwrap().destination() == 0x20);
		assert!(!engine.transport.written.is_empty());
	}

	#[test]
	fn test_s7_work_tick_backs_off_while_queue_busy() {
		let mut engine = new_engine();
		engine.add_slave(0x30, Box::new(CountingSlave::new())).unwrap();
		let mut reactor: Reactor<TimerKind> = Reactor::new().unwrap();

		engine.enqueue_request(0x30, &[0x30, 0x00], &mut reactor).unwrap();
		engine.on_timer(TimerKind::WorkTick, &mut reactor).unwrap();

		let deadline = reactor.deadline(TimerKind::WorkTick).unwrap();
		assert!(deadline <= Instant::now() + timing::WORK_TICK_BACKOFF + std::time::Duration::from_millis(5));
	}

	#[test]
	fn test_checksum_mismatch_still_advances_transaction() {
		let mut engine = new_engine();
		engine.add_slave(0x40, Box::new(CountingSlave::new())).unwrap();
		let mut reactor: Reactor<TimerKind> = Reactor::new().unwrap();
		engine.enqueue_request(0x40, &[0x40, 0x01], &mut reactor).unwrap();

		// Corrupt a valid reply's checksum.
		let mut framed = codec_vec(&[0x40, 0x05]);
		let csum_index = framed.len() - 3;
		framed[csum_index] ^= 0xFF;
		engine.transport.inbound.extend(framed);

		engine.on_readable(&mut reactor).unwrap();
		assert!(engine.queue.is_empty());
		assert!(!reactor.is_scheduled(TimerKind::ResponseDeadline));
		assert!(reactor.is_scheduled(TimerKind::InterframeGap));
	}

	#[test]
	fn test_unsolicited_frame_is_discarded_without_advancing() {
		let mut engine = new_engine();
		engine.add_slave(0x50, Box::new(CountingSlave::new())).unwrap();
		let mut reactor: Reactor<TimerKind> = Reactor::new().unwrap();

		let framed = codec_vec(&[0x50, 0x01]);
		engine.transport.inbound.extend(framed);
		engine.on_readable(&mut reactor).unwrap();

		assert!(!engine.registry.is_connected(0x50));
		assert!(!reactor.is_scheduled(TimerKind::InterframeGap));
	}

	fn codec_vec(payload: &[u8]) -> VecDeque<u8> {
		let mut out = vec![0u8; codec::maximum_framed_len(payload.len())];
		let len = codec::build(payload, &mut out);
		out.truncate(len);
		VecDeque::from(out)
	}
}
