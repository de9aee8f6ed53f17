//! Host commands of the loader.
//!
//! One opcode byte per command, arguments implied by the opcode:
//!
//! - `1`: read byte at cursor, cursor += 1; answers the byte
//! - `2 lo hi`: set cursor; answers `K`
//! - `3`: erase program memory; answers `K`
//! - `4 value`: program byte at cursor, cursor += 1; answers `K`
//! - `5`: reset into the application; answers `F`
//! - anything else: answers `?`

use std::fmt;
use std::io;

use crate::hal::Clock;
use crate::transport::{
	is_link_closed,
	SerialPort,
};

use super::{
	Flash,
	FlashRegisters,
};

pub const ACK: u8 = b'K';
pub const EXIT_ACK: u8 = b'F';
pub const UNKNOWN_OPCODE: u8 = b'?';

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum FlashOpCode {
	ReadByte = 1,
	SetAddress = 2,
	Erase = 3,
	ProgramByte = 4,
	ExitToApplication = 5,
}

impl FlashOpCode {
	pub fn from_byte(opcode: u8) -> Option<Self> {
		Some(match opcode {
			1 => FlashOpCode::ReadByte,
			2 => FlashOpCode::SetAddress,
			3 => FlashOpCode::Erase,
			4 => FlashOpCode::ProgramByte,
			5 => FlashOpCode::ExitToApplication,
			_ => return None,
		})
	}

	pub fn argument_count(self) -> usize {
		match self {
			FlashOpCode::SetAddress => 2,
			FlashOpCode::ProgramByte => 1,
			_ => 0,
		}
	}

	/// Reads the argument bytes following the opcode; unused ones stay zero.
	pub fn receive_arguments<P: SerialPort + ?Sized>(self, port: &mut P) -> io::Result<[u8; 2]> {
		let mut args = [0u8; 2];
		for arg in &mut args[..self.argument_count()] {
			*arg = port.read_byte()?;
		}
		Ok(args)
	}
}

/// Why the loader stopped serving.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Exit {
	/// the host sent the exit command
	Application,
	LinkClosed,
}

impl fmt::Display for Exit {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Exit::Application => write!(f, "switched to application"),
			Exit::LinkClosed => write!(f, "serial link closed"),
		}
	}
}

pub struct Loader<R: FlashRegisters, C: Clock> {
	flash: Flash<R, C>,
	cursor: u16,
}

impl<R: FlashRegisters, C: Clock> Loader<R, C> {
	pub fn new(flash: Flash<R, C>) -> Self {
		Loader {
			flash,
			cursor: 0,
		}
	}

	/// the next flash address read or programmed
	pub fn cursor(&self) -> u16 {
		self.cursor
	}

	pub fn flash_mut(&mut self) -> &mut Flash<R, C> {
		&mut self.flash
	}

	/// Runs `opcode` with the arguments from `FlashOpCode::receive_arguments`.
	pub fn execute<P: SerialPort + ?Sized>(&mut self, opcode: FlashOpCode, args: [u8; 2], port: &mut P) -> io::Result<()> {
		match opcode {
			FlashOpCode::ReadByte => {
				let value = self.flash.read(self.cursor);
				self.cursor = self.cursor.wrapping_add(1);
				port.write_byte(value)
			},
			FlashOpCode::SetAddress => {
				self.cursor = args[0] as u16 | (args[1] as u16) << 8;
				debug!("cursor = 0x{:04x}", self.cursor);
				port.write_byte(ACK)
			},
			FlashOpCode::Erase => {
				self.flash.erase();
				port.write_byte(ACK)
			},
			FlashOpCode::ProgramByte => {
				self.flash.program(self.cursor, args[0]);
				self.cursor = self.cursor.wrapping_add(1);
				port.write_byte(ACK)
			},
			FlashOpCode::ExitToApplication => {
				self.flash.exit_to_application();
				port.write_byte(EXIT_ACK)
			},
		}
	}

	/// Reads one opcode and answers it; `None` for unknown opcodes.
	pub fn handle_next<P: SerialPort + ?Sized>(&mut self, port: &mut P) -> io::Result<Option<FlashOpCode>> {
		let byte = port.read_byte()?;
		match FlashOpCode::from_byte(byte) {
			Some(opcode) => {
				let args = opcode.receive_arguments(port)?;
				self.execute(opcode, args, port)?;
				Ok(Some(opcode))
			},
			None => {
				debug!("unknown opcode 0x{:02x}", byte);
				port.write_byte(UNKNOWN_OPCODE)?;
				Ok(None)
			},
		}
	}

	pub fn serve<P: SerialPort + ?Sized>(&mut self, port: &mut P) -> crate::AResult<Exit> {
		loop {
			match self.handle_next(port) {
				Ok(Some(FlashOpCode::ExitToApplication)) => return Ok(Exit::Application),
				Ok(_) => (),
				Err(ref e) if is_link_closed(e) => return Ok(Exit::LinkClosed),
				Err(e) => return Err(e.into()),
			}
		}
	}
}
