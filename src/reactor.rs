//! Single-threaded reactor: one file-descriptor readiness registration plus
//! a small one-shot timer wheel, built on `mio`.
//!
//! This is deliberately generic over the timer token type (`T`) and knows
//! nothing about frames, slaves, or the engine's state machine; it only
//! knows "wait until the fd is readable or a deadline passes, then tell the
//! caller which happened." The engine drives its own logic from
//! `on_readable`/`on_timer` callbacks it owns, so engine behavior can be
//! exercised in tests without a real reactor tick (see `tests/`).

use std::io;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

const TTY_TOKEN: Token = Token(0);

/// A registered one-shot deadline, identified by an opaque caller token.
/// Scheduling the same token again replaces the previous deadline, which is
/// how the engine re-arms `response_deadline`/`interframe_gap` without
/// needing an explicit cancel-then-schedule dance.
pub struct Reactor<T> {
	poll: Poll,
	events: Events,
	timers: Vec<(T, Instant)>,
}

impl<T: Copy + Eq> Reactor<T> {
	pub fn new() -> io::Result<Self> {
		Ok(Self {
			poll: Poll::new()?,
			events: Events::with_capacity(4),
			timers: Vec::with_capacity(4),
		})
	}

	/// Register `fd` for read-readiness. Call once, at startup.
	pub fn register_fd(&mut self, fd: RawFd) -> io::Result<()> {
		self.poll.registry().register(&mut SourceFd(&fd), TTY_TOKEN, Interest::READABLE)
	}

	/// Arm (or re-arm) `token` to fire at `deadline`.
	pub fn schedule(&mut self, token: T, deadline: Instant) {
		self.timers.retain(|(t, _)| *t != token);
		self.timers.push((token, deadline));
	}

	/// Cancel `token` if pending. No-op if it wasn't armed.
	pub fn cancel(&mut self, token: T) {
		self.timers.retain(|(t, _)| *t != token);
	}

	/// Whether `token` is currently armed.
	pub fn is_scheduled(&self, token: T) -> bool {
		self.timers.iter().any(|(t, _)| *t == token)
	}

	/// The deadline `token` is currently armed for, if any.
	pub fn deadline(&self, token: T) -> Option<Instant> {
		self.timers.iter().find(|(t, _)| *t == token).map(|&(_, deadline)| deadline)
	}

	fn next_timeout(&self, now: Instant) -> Option<Duration> {
		self.timers.iter().map(|&(_, deadline)| deadline.saturating_duration_since(now)).min()
	}

	/// Block until the registered fd is readable or the earliest timer
	/// elapses, then report what happened.
	///
	/// Returns events rather than invoking callbacks directly: the engine's
	/// own callbacks need a mutable reference to this same reactor (to
	/// re-arm timers), which a callback taken by `&mut self` here could
	/// never grant without aliasing it. Dispatch is the caller's job, after
	/// this call has returned and released its borrow.
	pub fn poll(&mut self) -> io::Result<ReactorEvent<T>> {
		let timeout = self.next_timeout(Instant::now());
		self.poll.poll(&mut self.events, timeout)?;

		let readable = self.events.iter().any(|event| event.token() == TTY_TOKEN && event.is_readable());

		let now = Instant::now();
		let mut fired: Vec<(T, Instant)> = Vec::new();
		self.timers.retain(|&(token, deadline)| {
			if now >= deadline {
				fired.push((token, deadline));
				false
			} else {
				true
			}
		});
		fired.sort_by_key(|&(_, deadline)| deadline);

		Ok(ReactorEvent {
			readable,
			timers: fired.into_iter().map(|(token, _)| token).collect(),
		})
	}
}

/// What a single [`Reactor::poll`] call observed.
#[derive(Debug, Clone)]
pub struct ReactorEvent<T> {
	/// Whether the registered fd was readable.
	pub readable: bool,
	/// Tokens whose deadlines elapsed, oldest first.
	pub timers: Vec<T>,
}

#[cfg(test)]
mod test {
	use super::*;
	use assert2::assert;

	#[derive(Debug, Clone, Copy, Eq, PartialEq)]
	enum TestToken {
		A,
		B,
	}

	#[test]
	fn test_schedule_replaces_existing_deadline() {
		let mut reactor: Reactor<TestToken> = Reactor::new().unwrap();
		let now = Instant::now();
		reactor.schedule(TestToken::A, now + Duration::from_secs(10));
		reactor.schedule(TestToken::A, now + Duration::from_millis(1));
		assert!(reactor.timers.len() == 1);
		assert!(reactor.timers[0].1 == now + Duration::from_millis(1));
	}

	#[test]
	fn test_cancel_removes_pending_timer() {
		let mut reactor: Reactor<TestToken> = Reactor::new().unwrap();
		reactor.schedule(TestToken::A, Instant::now());
		assert!(reactor.is_scheduled(TestToken::A));
		reactor.cancel(TestToken::A);
		assert!(!reactor.is_scheduled(TestToken::A));
	}

	#[test]
	fn test_poll_fires_elapsed_timer() {
		let mut reactor: Reactor<TestToken> = Reactor::new().unwrap();
		reactor.schedule(TestToken::A, Instant::now());
		reactor.schedule(TestToken::B, Instant::now() + Duration::from_secs(60));

		let event = reactor.poll().unwrap();

		assert!(!event.readable);
		assert!(event.timers == [TestToken::A]);
		assert!(reactor.is_scheduled(TestToken::B));
	}

	#[test]
	fn test_poll_reports_fd_readiness() {
		let mut fds = [0i32; 2];
		let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
		assert!(rc == 0);
		let [read_fd, write_fd] = fds;

		let mut reactor: Reactor<TestToken> = Reactor::new().unwrap();
		reactor.register_fd(read_fd).unwrap();
		reactor.schedule(TestToken::A, Instant::now() + Duration::from_secs(60));

		let written = unsafe { libc::write(write_fd, b"x".as_ptr() as *const _, 1) };
		assert!(written == 1);

		let event = reactor.poll().unwrap();
		assert!(event.readable);
		assert!(event.timers.is_empty());

		unsafe {
			libc::close(read_fd);
			libc::close(write_fd);
		}
	}
}
