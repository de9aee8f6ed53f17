//! Host commands for register access on the bus.
//!
//! Every command is one byte, followed by a fixed number of argument bytes
//! implied by the command; every command is answered with exactly one byte:
//!
//! - `'r' addr subaddr`: register value, `0xff` if the device didn't answer
//! - `'w' addr subaddr value`: `0` on success, `1` on NAK
//! - `'s'`: lock status of the video decoder (bit 0 locked, bit 1 PAL)
//! - anything else: `'?'`, no arguments consumed

use std::io;
use std::time::Duration;

use crate::hal::Clock;
use crate::i2c::{
	BusAddress,
	RegisterBus,
};
use crate::lock::{
	LockProbe,
	LockState,
};
use crate::transport::{
	is_link_closed,
	SerialPort,
};

pub const READ_COMMAND: u8 = b'r';
pub const WRITE_COMMAND: u8 = b'w';
pub const STATUS_COMMAND: u8 = b's';

pub const WRITE_OK: u8 = 0;
pub const WRITE_NAK: u8 = 1;
pub const READ_FAILED: u8 = 0xff;
pub const UNKNOWN_COMMAND: u8 = b'?';

/// Longest low-power wait between polls (16-bit timer at 1 MHz).
pub const IDLE_WAIT_MAX: Duration = Duration::from_micros(65_535);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Command {
	Read { address: BusAddress, register: u8 },
	Write { address: BusAddress, register: u8, value: u8 },
	Status,
	Unknown(u8),
}

impl Command {
	/// argument bytes following the command byte
	pub fn argument_count(command: u8) -> usize {
		match command {
			READ_COMMAND => 2,
			WRITE_COMMAND => 3,
			_ => 0,
		}
	}

	/// Reads the arguments for `command` from the port.
	pub fn receive<P: SerialPort + ?Sized>(command: u8, port: &mut P) -> io::Result<Self> {
		let mut args = [0u8; 3];
		for arg in &mut args[..Command::argument_count(command)] {
			*arg = port.read_byte()?;
		}
		Ok(match command {
			READ_COMMAND => Command::Read {
				address: BusAddress::truncate(args[0]),
				register: args[1],
			},
			WRITE_COMMAND => Command::Write {
				address: BusAddress::truncate(args[0]),
				register: args[1],
				value: args[2],
			},
			STATUS_COMMAND => Command::Status,
			other => Command::Unknown(other),
		})
	}
}

pub struct Bridge<B: RegisterBus, C: Clock> {
	bus: B,
	clock: C,
	probe: Option<LockProbe>,
	lock: LockState,
	idle_wait: Duration,
}

impl<B: RegisterBus, C: Clock> Bridge<B, C> {
	pub fn new(bus: B, clock: C) -> Self {
		Bridge {
			bus,
			clock,
			probe: None,
			lock: LockState::default(),
			idle_wait: IDLE_WAIT_MAX,
		}
	}

	pub fn with_lock_probe(mut self, probe: LockProbe) -> Self {
		self.probe = Some(probe);
		self
	}

	/// capped at `IDLE_WAIT_MAX`
	pub fn set_idle_wait(&mut self, wait: Duration) {
		self.idle_wait = wait.min(IDLE_WAIT_MAX);
	}

	pub fn lock_state(&self) -> LockState {
		self.lock
	}

	pub fn bus_mut(&mut self) -> &mut B {
		&mut self.bus
	}

	pub fn clock_mut(&mut self) -> &mut C {
		&mut self.clock
	}

	/// Work done while no command is pending: poll the decoder, then sleep.
	pub fn idle_step(&mut self) {
		if let Some(probe) = self.probe {
			let lock = probe.poll(&mut self.bus, self.lock);
			if lock != self.lock {
				info!("video input: {}", lock);
			}
			self.lock = lock;
		}
		self.clock.sleep(self.idle_wait);
	}

	pub fn execute<P: SerialPort + ?Sized>(&mut self, command: Command, port: &mut P) -> io::Result<()> {
		let response = match command {
			Command::Read { address, register } => {
				match self.bus.read_register(address, register) {
					Ok(value) => value,
					Err(e) => {
						debug!("read failed: {}", e);
						READ_FAILED
					},
				}
			},
			Command::Write { address, register, value } => {
				match self.bus.write_register(address, register, value) {
					Ok(()) => WRITE_OK,
					Err(e) => {
						debug!("write failed: {}", e);
						WRITE_NAK
					},
				}
			},
			Command::Status => self.lock.status_byte(),
			Command::Unknown(byte) => {
				debug!("unknown command 0x{:02x}", byte);
				UNKNOWN_COMMAND
			},
		};
		port.write_byte(response)
	}

	/// Wait for the next command (doing idle work meanwhile) and answer it.
	pub fn handle_next<P: SerialPort + ?Sized>(&mut self, port: &mut P) -> io::Result<Command> {
		self.bus.idle();
		while !port.byte_available()? {
			self.idle_step();
		}
		let byte = port.read_byte()?;
		let command = Command::receive(byte, port)?;
		self.execute(command, port)?;
		Ok(command)
	}

	/// Answers commands until the host goes away.
	pub fn serve<P: SerialPort + ?Sized>(&mut self, port: &mut P) -> crate::AResult<()> {
		loop {
			match self.handle_next(port) {
				Ok(command) => trace!("handled {:?}", command),
				Err(ref e) if is_link_closed(e) => {
					info!("host closed the serial link");
					return Ok(());
				},
				Err(e) => return Err(e.into()),
			}
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::hal::{
		NoDelay,
		RecordingClock,
	};
	use crate::i2c::{
		BusTiming,
		I2cMaster,
		sim::{
			Refusal,
			SimBus,
			SimDevice,
		},
	};
	use crate::lock::VideoStandard;
	use crate::transport::ScriptedPort;

	type SimBridge<'a> = Bridge<I2cMaster<&'a mut SimBus, NoDelay>, NoDelay>;

	fn decoder_bus() -> SimBus {
		SimBus::new().with_device(SimDevice::new(BusAddress::truncate(0x21)).with_register(0x10, 0x37))
	}

	fn bridge(bus: &mut SimBus) -> SimBridge {
		Bridge::new(I2cMaster::new(bus, NoDelay, BusTiming::default()), NoDelay)
	}

	fn check_exchange(bus: &mut SimBus, input: &[u8], expected: &[u8]) {
		let mut port = ScriptedPort::new(input);
		bridge(bus).serve(&mut port).unwrap();
		assert_eq!(port.output(), expected, "answer to {:x?}", input);
	}

	#[test]
	fn unknown_command_consumes_nothing() {
		let mut bus = decoder_bus();
		let mut port = ScriptedPort::new(&[0x58, b'r', 0x21, 0x10]);
		let mut b = bridge(&mut bus);

		assert_eq!(b.handle_next(&mut port).unwrap(), Command::Unknown(0x58));
		assert_eq!(port.output(), b"?");
		assert_eq!(port.pending(), 3);

		assert_eq!(b.handle_next(&mut port).unwrap(), Command::Read { address: BusAddress::truncate(0x21), register: 0x10 });
		assert_eq!(port.output(), b"?\x37");
	}

	#[test]
	fn argument_counts() {
		assert_eq!(Command::argument_count(b'r'), 2);
		assert_eq!(Command::argument_count(b'w'), 3);
		assert_eq!(Command::argument_count(b's'), 0);
		assert_eq!(Command::argument_count(0x58), 0);

		let mut port = ScriptedPort::new(&[0xa1, 0x10, 0x42, b's']);
		assert_eq!(Command::receive(b'w', &mut port).unwrap(), Command::Write {
			address: BusAddress::truncate(0x21),
			register: 0x10,
			value: 0x42,
		});
		assert_eq!(port.pending(), 1);
		assert_eq!(Command::receive(b's', &mut port).unwrap(), Command::Status);
		assert_eq!(port.pending(), 1);
	}

	#[test]
	fn write_acknowledged() {
		let mut bus = decoder_bus();
		check_exchange(&mut bus, &[b'w', 0x21, 0x10, 0x42], &[0x00]);
		assert_eq!(bus.device(BusAddress::truncate(0x21)).unwrap().register(0x10), 0x42);
	}

	#[test]
	fn read_register_value() {
		let mut bus = decoder_bus();
		check_exchange(&mut bus, &[b'r', 0x21, 0x10], &[0x37]);
	}

	#[test]
	fn missing_device() {
		let mut bus = decoder_bus();
		check_exchange(&mut bus, &[b'w', 0x22, 0x10, 0x42, b'r', 0x22, 0x10], &[0x01, 0xff]);
		assert!(bus.is_idle());
	}

	#[test]
	fn refused_bytes_fail_commands() {
		let mut bus = SimBus::new().with_device(SimDevice::new(BusAddress::truncate(0x21)).refusing(Refusal::Data));
		check_exchange(&mut bus, &[b'w', 0x21, 0x10, 0x42, b'r', 0x21, 0x10], &[0x01, 0x00]);

		let mut bus = SimBus::new().with_device(SimDevice::new(BusAddress::truncate(0x21))
			.with_register(0x10, 0x37)
			.refusing(Refusal::ReadAddress));
		check_exchange(&mut bus, &[b'r', 0x21, 0x10, b'w', 0x21, 0x10, 0x42], &[0xff, 0x00]);
		assert!(bus.is_idle());
	}

	#[test]
	fn address_bit_seven_is_dropped() {
		let mut bus = decoder_bus();
		check_exchange(&mut bus, &[b'r', 0xa1, 0x10], &[0x37]);
	}

	#[test]
	fn session() {
		let mut bus = decoder_bus();
		check_exchange(&mut bus, &[
			b'w', 0x21, 0x3d, 0xc3,
			b'x',
			b'r', 0x21, 0x3d,
			b's',
		], &[0x00, b'?', 0xc3, 0x00]);
	}

	#[test]
	fn idle_polling_updates_status() {
		let mut bus = SimBus::new().with_device(SimDevice::new(BusAddress::truncate(0x21)).with_register(0x10, 0x41));
		let mut clock = RecordingClock::default();
		{
			let mut b = Bridge::new(I2cMaster::new(&mut bus, NoDelay, BusTiming::default()), &mut clock)
				.with_lock_probe(LockProbe::default());
			b.set_idle_wait(Duration::from_secs(1));
			assert_eq!(b.lock_state(), LockState::default());

			b.idle_step();
			assert_eq!(b.lock_state(), LockState { locked: true, standard: VideoStandard::Pal });

			let mut port = ScriptedPort::new(b"s");
			b.handle_next(&mut port).unwrap();
			assert_eq!(port.output(), &[0b11]);

			b.bus_mut().gpio_mut().device_mut(BusAddress::truncate(0x21)).unwrap().set_register(0x10, 0x00);
			b.idle_step();
			assert_eq!(b.lock_state(), LockState { locked: false, standard: VideoStandard::Pal });
		}
		// capped low-power waits
		assert_eq!(clock.sleeps, vec![IDLE_WAIT_MAX, IDLE_WAIT_MAX]);
	}
}
