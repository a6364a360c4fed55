use std::path::PathBuf;

/// Drive the pool-equipment RS-485 bus: probe for slaves, poll them in
/// round-robin, and dispatch replies to their handlers.
#[derive(clap::Parser)]
pub struct Options {
	/// Print more verbose messages. Can be used multiple times.
	#[clap(long, short)]
	#[clap(action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// The serial device to use.
	#[clap(long)]
	#[clap(default_value = "/dev/ttyS0")]
	pub tty: PathBuf,

	/// The baud rate for the serial port.
	#[clap(long)]
	#[clap(default_value = "9600")]
	pub baud: u32,

	/// Administratively register a slave address. Repeatable. Accepts
	/// decimal or `0x`-prefixed hexadecimal.
	#[clap(long = "slave", value_name = "ADDRESS")]
	#[clap(value_parser = parse_address)]
	pub slaves: Vec<u8>,

	/// Interval between discovery probe sweeps, in milliseconds.
	#[clap(long)]
	#[clap(default_value = "2000")]
	pub probe_interval_ms: u64,

	/// Nominal interval between round-robin work sweeps, in milliseconds.
	#[clap(long)]
	#[clap(default_value = "500")]
	pub work_interval_ms: u64,
}

fn parse_address(text: &str) -> Result<u8, String> {
	let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
		u8::from_str_radix(hex, 16)
	} else {
		text.parse::<u8>()
	};
	parsed.map_err(|e| format!("invalid slave address {:?}: {}", text, e))
}
