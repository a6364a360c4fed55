//! Slave registry: a small, bounded, sorted table of bus addresses.
//!
//! Entries are kept sorted ascending by address for the whole lifetime of
//! the table (addresses are only ever added, per the bus convention — see
//! [`Registry::add`]), so lookups are a binary search and the scheduler can
//! walk occupied entries in address order with a plain loop.

use std::time::Instant;

use crate::error::RegistryError;
use crate::protocol::timing::STALENESS_TIMEOUT;

/// Default table size; the bus's hard cap on distinct slave addresses.
pub const DEFAULT_CAPACITY: usize = 16;

/// The capability set a slave implementation provides to the core.
///
/// All methods run on the reactor thread and must return promptly; nothing
/// here is async.
pub trait SlaveHandlers {
	/// A well-formed, checksum-valid reply arrived for a request the core
	/// routed to this slave. `payload` is the unstuffed application bytes,
	/// source address at `payload[0]`, opcode at `payload[1]`.
	fn on_reply(&mut self, payload: &[u8]);

	/// Called by the work scheduler to produce the next application-level
	/// request for this slave. Returning `None` means "no request this
	/// cycle"; the core overwrites `out[0]` with the slave's address before
	/// framing whatever is returned.
	fn get_next_request(&mut self, out: &mut [u8]) -> Option<usize>;

	/// Optional hook fired when this slave's probe reply is handled.
	/// Default does nothing; the engine always updates `connected` and the
	/// staleness deadline itself regardless of this hook.
	fn on_probe_reply(&mut self) {}
}

struct Entry {
	address: u8,
	handlers: Box<dyn SlaveHandlers>,
	connected: bool,
	staleness_deadline: Option<Instant>,
}

/// Bounded, sorted table of slave entries.
pub struct Registry<const N: usize = DEFAULT_CAPACITY> {
	entries: [Option<Entry>; N],
	occupied: usize,
}

impl<const N: usize> Registry<N> {
	pub fn new() -> Self {
		Self {
			entries: std::array::from_fn(|_| None),
			occupied: 0,
		}
	}

	fn occupied_slice(&self) -> &[Option<Entry>] {
		&self.entries[..self.occupied]
	}

	fn find(&self, address: u8) -> Result<usize, usize> {
		self.occupied_slice().binary_search_by_key(&address, |e| e.as_ref().unwrap().address)
	}

	/// Insert a new slave. Preserves the ascending-address sorted-prefix
	/// invariant. Fails with [`RegistryError::AlreadyPresent`] if `address`
	/// is already registered, or [`RegistryError::Full`] if the table has no
	/// free slots.
	pub fn add(&mut self, address: u8, handlers: Box<dyn SlaveHandlers>) -> Result<(), RegistryError> {
		debug_assert!(address != 0, "address 0 is the empty-slot sentinel");

		let insert_at = match self.find(address) {
			Ok(_) => return Err(RegistryError::AlreadyPresent),
			Err(at) => at,
		};
		if self.occupied >= N {
			return Err(RegistryError::Full);
		}

		let mut i = self.occupied;
		while i > insert_at {
			self.entries.swap(i, i - 1);
			i -= 1;
		}
		self.entries[insert_at] = Some(Entry {
			address,
			handlers,
			connected: false,
			staleness_deadline: None,
		});
		self.occupied += 1;
		Ok(())
	}

	/// Whether `address` is registered.
	pub fn contains(&self, address: u8) -> bool {
		self.find(address).is_ok()
	}

	/// Whether `address` is registered and currently marked connected.
	pub fn is_connected(&self, address: u8) -> bool {
		match self.find(address) {
			Ok(idx) => self.entries[idx].as_ref().unwrap().connected,
			Err(_) => false,
		}
	}

	/// Mark `address` connected and (re)arm its staleness deadline to
	/// [`STALENESS_TIMEOUT`] from `now`. Returns `false` if the address is
	/// not registered.
	pub fn mark_alive(&mut self, address: u8, now: Instant) -> bool {
		match self.find(address) {
			Ok(idx) => {
				let entry = self.entries[idx].as_mut().unwrap();
				entry.connected = true;
				entry.staleness_deadline = Some(now + STALENESS_TIMEOUT);
				true
			},
			Err(_) => false,
		}
	}

	/// Deliver a reply payload to `address`'s handler. Returns `false`
	/// (logging a warning) if the address is not registered.
	pub fn dispatch_reply(&mut self, address: u8, payload: &[u8]) -> bool {
		match self.find(address) {
			Ok(idx) => {
				self.entries[idx].as_mut().unwrap().handlers.on_reply(payload);
				true
			},
			Err(_) => {
				warn!("reply attributed to unknown slave {:#04x}", address);
				false
			},
		}
	}

	/// Fire the optional probe-completion hook for `address`. Returns
	/// `false` if the address is not registered.
	pub fn invoke_on_probe_reply(&mut self, address: u8) -> bool {
		match self.find(address) {
			Ok(idx) => {
				self.entries[idx].as_mut().unwrap().handlers.on_probe_reply();
				true
			},
			Err(_) => false,
		}
	}

	/// Check every occupied entry's staleness deadline against `now`,
	/// clearing `connected` (and logging a warning) for any that have
	/// expired.
	pub fn sweep_staleness(&mut self, now: Instant) {
		for slot in &mut self.entries[..self.occupied] {
			let entry = slot.as_mut().unwrap();
			if entry.connected {
				if let Some(deadline) = entry.staleness_deadline {
					if now >= deadline {
						entry.connected = false;
						warn!("slave {:#04x} went stale", entry.address);
					}
				}
			}
		}
	}

	/// Invoke `f(address, connected, handlers)` for every occupied entry in
	/// ascending address order.
	pub fn for_each_occupied_mut(&mut self, mut f: impl FnMut(u8, bool, &mut dyn SlaveHandlers)) {
		for slot in &mut self.entries[..self.occupied] {
			let entry = slot.as_mut().unwrap();
			f(entry.address, entry.connected, entry.handlers.as_mut());
		}
	}

	pub fn len(&self) -> usize {
		self.occupied
	}

	pub fn is_empty(&self) -> bool {
		self.occupied == 0
	}
}

impl<const N: usize> Default for Registry<N> {
	fn default() -> Self {
		Self::new()
	}
}

impl<const N: usize> std::fmt::Debug for Registry<N> {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		let addresses: Vec<u8> = self.occupied_slice().iter().map(|e| e.as_ref().unwrap().address).collect();
		f.debug_struct("Registry").field("capacity", &N).field("addresses", &addresses).finish_non_exhaustive()
	}
}
