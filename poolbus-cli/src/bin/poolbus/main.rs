use clap::Parser;

mod logging;
mod options;

use options::Options;
use poolbus::registry::SlaveHandlers;
use poolbus::{Engine, Reactor, TimerKind, TtyTransport};

/// Demo slave handler that proves the registry/engine wiring end-to-end
/// without pretending to implement real heater/panel business logic: it
/// logs replies and never produces a request of its own.
struct NullSlave {
	address: u8,
}

impl SlaveHandlers for NullSlave {
	fn on_reply(&mut self, payload: &[u8]) {
		log::debug!("slave {:#04x} replied: {:02x?}", self.address, payload);
	}

	fn get_next_request(&mut self, _out: &mut [u8]) -> Option<usize> {
		None
	}
}

fn main() {
	let options = Options::parse();
	logging::init(env!("CARGO_CRATE_NAME"), options.verbose);
	if let Err(()) = do_main(options) {
		std::process::exit(1);
	}
}

fn do_main(options: Options) -> Result<(), ()> {
	if options.slaves.is_empty() {
		log::warn!("no --slave addresses registered; the bus will idle on the probe/work timers");
	}

	let transport = TtyTransport::open(&options.tty, options.baud).map_err(|e| {
		log::error!("failed to open {}: {}", options.tty.display(), e);
	})?;

	let mut engine: Engine<TtyTransport> = Engine::new(transport);
	engine.set_intervals(
		std::time::Duration::from_millis(options.probe_interval_ms),
		std::time::Duration::from_millis(options.work_interval_ms),
	);
	for address in &options.slaves {
		engine.add_slave(*address, Box::new(NullSlave { address: *address })).map_err(|e| {
			log::error!("failed to register slave {:#04x}: {}", address, e);
		})?;
	}

	let mut reactor: Reactor<TimerKind> = Reactor::new().map_err(|e| log::error!("failed to create reactor: {}", e))?;
	reactor.register_fd(engine.raw_fd()).map_err(|e| log::error!("failed to register TTY with reactor: {}", e))?;
	engine.start(&mut reactor);

	loop {
		let event = reactor.poll().map_err(|e| log::error!("reactor poll failed: {}", e))?;

		if event.readable {
			engine.on_readable(&mut reactor).map_err(|e| log::error!("{}", e))?;
		}
		for timer in event.timers {
			engine.on_timer(timer, &mut reactor).map_err(|e| log::error!("{}", e))?;
		}
	}
}
