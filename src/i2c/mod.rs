/// Bit-banged two-wire (I²C) bus master.
///
/// Both lines are open-drain: the master either pulls a line low or releases
/// it, and a released line only reads high once no device holds it down.
/// Devices use this to acknowledge bytes (pulling DATA low during the 9th
/// clock) and to stretch the clock (holding CLOCK low after the master
/// released it).
///
/// Framing:
/// - START: DATA falls while CLOCK is high
/// - 8 data bits, MSB first, DATA changes only while CLOCK is low
/// - 1 acknowledge bit from the receiver: low = ACK, high = NAK
/// - STOP: DATA rises while CLOCK is high
///
/// The first byte after START is the 7-bit device address followed by the
/// direction bit (0 = write, 1 = read).
///
/// Register access as used by the video chips:
/// - write: `START, addr|W, subaddr, value, STOP`
/// - read:  `START, addr|W, subaddr, START, addr|R, value (NAK), STOP`

use failure::Fail;
use std::fmt;
use std::str;
use std::time::Duration;

mod hardware;
mod low_level;
mod operations;
pub mod sim;

pub use self::hardware::{
	Hardware,
	I2cMaster,
};

pub use self::low_level::LowLevel;

/// 7-bit device address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct BusAddress(u8);

impl BusAddress {
	pub fn new(address: u8) -> Option<Self> {
		if address < 0x80 {
			Some(BusAddress(address))
		} else {
			None
		}
	}

	/// drops bit 7, like shifting the raw byte into the address position does
	pub fn truncate(address: u8) -> Self {
		BusAddress(address & 0x7f)
	}

	pub fn get(self) -> u8 {
		self.0
	}

	/// address byte selecting the write direction
	pub fn write_byte(self) -> u8 {
		self.0 << 1
	}

	/// address byte selecting the read direction
	pub fn read_byte(self) -> u8 {
		self.0 << 1 | 1
	}
}

impl fmt::Display for BusAddress {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "0x{:02x}", self.0)
	}
}

impl str::FromStr for BusAddress {
	type Err = ::failure::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let a = crate::parse_hex_byte(s)?;
		match BusAddress::new(a) {
			Some(a) => Ok(a),
			None => bail!("bus address 0x{:02x} has more than 7 bits", a),
		}
	}
}

/// Byte of a transaction that can be refused.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Step {
	Address,
	Subaddress,
	Data,
}

impl fmt::Display for Step {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Step::Address => write!(f, "address"),
			Step::Subaddress => write!(f, "subaddress"),
			Step::Data => write!(f, "data"),
		}
	}
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Fail)]
#[fail(display = "device {} didn't acknowledge the {} byte", address, step)]
pub struct Nak {
	pub address: BusAddress,
	pub step: Step,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct BusTiming {
	/// one phase (high or low) of the bus clock
	pub half_cycle: Duration,
	/// wait after releasing the bus at startup
	pub settle: Duration,
}

impl Default for BusTiming {
	// ~40 kHz
	fn default() -> Self {
		BusTiming {
			half_cycle: Duration::from_nanos(12_500),
			settle: Duration::from_millis(15),
		}
	}
}

/// Register access to devices on the bus.
pub trait RegisterBus {
	fn write_register(&mut self, address: BusAddress, register: u8, value: u8) -> Result<(), Nak>;

	fn read_register(&mut self, address: BusAddress, register: u8) -> Result<u8, Nak>;

	/// return the lines to idle-high between commands
	fn idle(&mut self) {
	}
}

impl<'a, B: ?Sized + RegisterBus> RegisterBus for &'a mut B {
	fn write_register(&mut self, address: BusAddress, register: u8, value: u8) -> Result<(), Nak> {
		B::write_register(*self, address, register, value)
	}
	fn read_register(&mut self, address: BusAddress, register: u8) -> Result<u8, Nak> {
		B::read_register(*self, address, register)
	}
	fn idle(&mut self) {
		B::idle(*self)
	}
}
