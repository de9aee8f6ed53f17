//! Program memory access through the in-circuit programming registers.
//!
//! Program memory is reached through a small register window: the address goes
//! into the address registers, the data byte into the data register, and
//! writing an opcode to the command register starts the access. Erase and
//! program only take effect while programming mode is enabled, and the mode
//! register can only be written right after the two byte key was written to
//! the enable register.

use std::fmt;
use std::time::Duration;

use crate::hal::Clock;

pub mod protocol;
pub mod sim;

pub use self::protocol::{
	Exit,
	FlashOpCode,
	Loader,
};

pub mod consts {
	// commands for `Register::Command`
	pub const CMD_READ: u8 = 0x00;
	pub const CMD_PROGRAM: u8 = 0x21;
	pub const CMD_ERASE: u8 = 0x22;

	// written to `Register::Enable` in this order to unlock `Register::Control`
	pub const ENABLE_KEY: [u8; 2] = [0x87, 0x59];
	pub const ENABLE_RELOCK: u8 = 0x00;

	// `Register::Control` modes
	pub const MODE_PROGRAMMING: u8 = 0x03;
	pub const MODE_EXIT: u8 = 0x83; // reset into the application
}

use self::consts::*;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Register {
	AddressLow,
	AddressHigh,
	Data,
	Command,
	Enable,
	Control,
}

impl fmt::Display for Register {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let name = match self {
			Register::AddressLow => "SFRAL",
			Register::AddressHigh => "SFRAH",
			Register::Data => "SFRFD",
			Register::Command => "SFRCN",
			Register::Enable => "CHPENR",
			Register::Control => "CHPCON",
		};
		f.write_str(name)
	}
}

/// The mapped flash control registers.
pub trait FlashRegisters {
	fn write_register(&mut self, register: Register, value: u8);
	fn read_register(&mut self, register: Register) -> u8;
}

impl<'a, R: ?Sized + FlashRegisters> FlashRegisters for &'a mut R {
	fn write_register(&mut self, register: Register, value: u8) {
		R::write_register(*self, register, value)
	}
	fn read_register(&mut self, register: Register) -> u8 {
		R::read_register(*self, register)
	}
}

trait FlashRegistersExt: FlashRegisters {
	fn write_logged(&mut self, register: Register, value: u8) {
		trace!("{} <- 0x{:02x}", register, value);
		self.write_register(register, value);
	}

	fn select_mode(&mut self, mode: u8) {
		for &key in &ENABLE_KEY {
			self.write_logged(Register::Enable, key);
		}
		self.write_logged(Register::Control, mode);
		self.write_logged(Register::Enable, ENABLE_RELOCK);
	}

	fn set_address(&mut self, address: u16) {
		self.write_logged(Register::AddressLow, address as u8);
		self.write_logged(Register::AddressHigh, (address >> 8) as u8);
	}
}
impl<R: FlashRegisters + ?Sized> FlashRegistersExt for R {}

/// How long an access needs after its command was issued.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct LoaderTiming {
	pub read: Duration,
	pub program: Duration,
	pub erase: Duration,
}

impl Default for LoaderTiming {
	fn default() -> Self {
		LoaderTiming {
			read: Duration::from_micros(50),
			program: Duration::from_micros(50),
			erase: Duration::from_millis(15),
		}
	}
}

pub struct Flash<R: FlashRegisters, C: Clock> {
	registers: R,
	clock: C,
	timing: LoaderTiming,
}

impl<R: FlashRegisters, C: Clock> Flash<R, C> {
	pub fn new(registers: R, clock: C, timing: LoaderTiming) -> Self {
		Flash {
			registers,
			clock,
			timing,
		}
	}

	pub fn clock_mut(&mut self) -> &mut C {
		&mut self.clock
	}

	/// Needs a transition to idle before it takes effect.
	pub fn enter_programming(&mut self) {
		debug!("enabling programming mode");
		self.registers.select_mode(MODE_PROGRAMMING);
	}

	/// Afterwards the chip resets into the application.
	pub fn exit_to_application(&mut self) {
		debug!("leaving loader");
		self.registers.select_mode(MODE_EXIT);
	}

	pub fn read(&mut self, address: u16) -> u8 {
		self.registers.set_address(address);
		self.registers.write_logged(Register::Command, CMD_READ);
		self.clock.sleep(self.timing.read);
		let value = self.registers.read_register(Register::Data);
		trace!("flash[0x{:04x}] = 0x{:02x}", address, value);
		value
	}

	pub fn program(&mut self, address: u16, value: u8) {
		debug!("programming flash[0x{:04x}] = 0x{:02x}", address, value);
		self.registers.set_address(address);
		self.registers.write_logged(Register::Data, value);
		self.registers.select_mode(MODE_PROGRAMMING);
		self.registers.write_logged(Register::Command, CMD_PROGRAM);
		self.clock.sleep(self.timing.program);
	}

	/// Erases all of program memory.
	pub fn erase(&mut self) {
		debug!("erasing flash");
		self.registers.select_mode(MODE_PROGRAMMING);
		self.registers.write_logged(Register::Command, CMD_ERASE);
		self.clock.sleep(self.timing.erase);
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::hal::RecordingClock;

	#[derive(Default)]
	struct RegisterLog {
		writes: Vec<(Register, u8)>,
		data: u8,
	}

	impl FlashRegisters for RegisterLog {
		fn write_register(&mut self, register: Register, value: u8) {
			self.writes.push((register, value));
		}
		fn read_register(&mut self, register: Register) -> u8 {
			assert_eq!(register, Register::Data);
			self.data
		}
	}

	const UNLOCK_PROGRAMMING: [(Register, u8); 4] = [
		(Register::Enable, 0x87),
		(Register::Enable, 0x59),
		(Register::Control, 0x03),
		(Register::Enable, 0x00),
	];

	#[test]
	fn read_sequence() {
		let mut log = RegisterLog { data: 0x5a, ..Default::default() };
		let mut clock = RecordingClock::default();
		{
			let mut flash = Flash::new(&mut log, &mut clock, LoaderTiming::default());
			assert_eq!(flash.read(0x1234), 0x5a);
		}
		assert_eq!(log.writes, vec![
			(Register::AddressLow, 0x34),
			(Register::AddressHigh, 0x12),
			(Register::Command, 0x00),
		]);
		assert_eq!(clock.sleeps, vec![Duration::from_micros(50)]);
	}

	#[test]
	fn program_unlocks_first() {
		let mut log = RegisterLog::default();
		let mut clock = RecordingClock::default();
		{
			let mut flash = Flash::new(&mut log, &mut clock, LoaderTiming::default());
			flash.program(0x0010, 0x99);
		}
		let mut expected = vec![
			(Register::AddressLow, 0x10),
			(Register::AddressHigh, 0x00),
			(Register::Data, 0x99),
		];
		expected.extend_from_slice(&UNLOCK_PROGRAMMING);
		expected.push((Register::Command, 0x21));
		assert_eq!(log.writes, expected);
		assert_eq!(clock.sleeps, vec![Duration::from_micros(50)]);
	}

	#[test]
	fn erase_waits_long() {
		let mut log = RegisterLog::default();
		let mut clock = RecordingClock::default();
		{
			let mut flash = Flash::new(&mut log, &mut clock, LoaderTiming::default());
			flash.erase();
		}
		let mut expected = UNLOCK_PROGRAMMING.to_vec();
		expected.push((Register::Command, 0x22));
		assert_eq!(log.writes, expected);
		assert_eq!(clock.sleeps, vec![Duration::from_millis(15)]);
	}

	#[test]
	fn exit_uses_own_mode() {
		let mut log = RegisterLog::default();
		Flash::new(&mut log, RecordingClock::default(), LoaderTiming::default()).exit_to_application();
		assert_eq!(log.writes, vec![
			(Register::Enable, 0x87),
			(Register::Enable, 0x59),
			(Register::Control, 0x83),
			(Register::Enable, 0x00),
		]);
	}
}
