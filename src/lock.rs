//! Video decoder lock detection, polled while the host is quiet.

use std::fmt;
use std::str;

use crate::i2c::{
	BusAddress,
	RegisterBus,
};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum VideoStandard {
	Ntsc,
	Pal,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct LockState {
	pub locked: bool,
	/// last detected standard; kept while unlocked
	pub standard: VideoStandard,
}

impl LockState {
	/// bit 0: locked, bit 1: PAL
	pub fn status_byte(self) -> u8 {
		let pal = self.standard == VideoStandard::Pal;
		(self.locked as u8) | (pal as u8) << 1
	}
}

impl Default for LockState {
	fn default() -> Self {
		LockState {
			locked: false,
			standard: VideoStandard::Ntsc,
		}
	}
}

impl fmt::Display for LockState {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		if self.locked {
			write!(f, "locked ({:?})", self.standard)
		} else {
			write!(f, "no lock")
		}
	}
}

/// Where the decoder reports its lock status.
///
/// Defaults match an ADV7180 at 0x21: status register 1 with IN_LOCK in bit
/// 0; bit 6 of the autodetect result is set for the 625-line standards.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct LockProbe {
	pub address: BusAddress,
	pub status_register: u8,
	pub lock_mask: u8,
	pub pal_mask: u8,
}

impl Default for LockProbe {
	fn default() -> Self {
		LockProbe {
			address: BusAddress::truncate(0x21),
			status_register: 0x10,
			lock_mask: 0x01,
			pal_mask: 0x40,
		}
	}
}

impl str::FromStr for LockProbe {
	type Err = ::failure::Error;

	/// `ADDR` or `ADDR:REG` in hex; the masks keep their defaults
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let mut probe = LockProbe::default();
		let address = match s.find(':') {
			Some(p) => {
				probe.status_register = crate::parse_hex_byte(&s[p + 1..])?;
				&s[..p]
			},
			None => s,
		};
		probe.address = address.parse()?;
		Ok(probe)
	}
}

impl LockProbe {
	pub fn decode(&self, status: u8, previous: LockState) -> LockState {
		let locked = 0 != status & self.lock_mask;
		if !locked {
			return LockState { locked, ..previous };
		}
		let standard = if 0 != status & self.pal_mask {
			VideoStandard::Pal
		} else {
			VideoStandard::Ntsc
		};
		LockState { locked, standard }
	}

	/// One status read; a device that doesn't answer counts as unlocked.
	pub fn poll<B: RegisterBus + ?Sized>(&self, bus: &mut B, previous: LockState) -> LockState {
		match bus.read_register(self.address, self.status_register) {
			Ok(status) => self.decode(status, previous),
			Err(e) => {
				debug!("lock poll failed: {}", e);
				LockState { locked: false, ..previous }
			},
		}
	}
}
