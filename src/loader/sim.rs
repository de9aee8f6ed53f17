//! Simulated program memory behind the flash control registers.

use std::fmt;
use std::fs;
use std::path::Path;

use super::consts::*;
use super::{
	FlashRegisters,
	Register,
};

/// 32 KiB of program memory
pub const DEFAULT_SIZE: usize = 0x8000;

const ERASED: u8 = 0xff;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
enum KeyState {
	Locked,
	FirstKey,
	Unlocked,
}

/// Program memory plus the register window in front of it.
///
/// Memory starts erased; programming can only clear bits. Accesses past the
/// end read as erased and programming them is ignored.
#[derive(Clone, PartialEq, Eq)]
pub struct SimulatedFlash {
	memory: Vec<u8>,
	address: u16,
	data: u8,
	key: KeyState,
	mode: u8,
	exit_requested: bool,
}

impl SimulatedFlash {
	pub fn new(size: usize) -> Self {
		SimulatedFlash {
			memory: vec![ERASED; size],
			address: 0,
			data: 0,
			key: KeyState::Locked,
			mode: 0,
			exit_requested: false,
		}
	}

	/// `image` is placed at offset 0, the rest stays erased
	pub fn from_image(image: &[u8], size: usize) -> crate::AResult<Self> {
		ensure!(image.len() <= size, "image has {} bytes, program memory only {}", image.len(), size);
		let mut flash = SimulatedFlash::new(size);
		flash.memory[..image.len()].copy_from_slice(image);
		Ok(flash)
	}

	pub fn load<P: AsRef<Path>>(path: P, size: usize) -> crate::AResult<Self> {
		let path = path.as_ref();
		with_context!(("couldn't load flash image {:?}", path), {
			let image = fs::read(path)?;
			SimulatedFlash::from_image(&image, size)
		})
	}

	pub fn save<P: AsRef<Path>>(&self, path: P) -> crate::AResult<()> {
		let path = path.as_ref();
		with_context!(("couldn't save flash image {:?}", path), {
			fs::write(path, &self.memory)?;
			Ok(())
		})
	}

	pub fn contents(&self) -> &[u8] {
		&self.memory
	}

	pub fn size(&self) -> usize {
		self.memory.len()
	}

	pub fn programming_enabled(&self) -> bool {
		self.mode == MODE_PROGRAMMING
	}

	/// whether the loader asked to reset into the application
	pub fn exit_requested(&self) -> bool {
		self.exit_requested
	}

	fn execute(&mut self, command: u8) {
		let address = self.address as usize;
		match command {
			CMD_READ => {
				self.data = self.memory.get(address).cloned().unwrap_or(ERASED);
			},
			CMD_PROGRAM => {
				if !self.programming_enabled() {
					warn!("program command without programming mode, ignored");
					return;
				}
				match self.memory.get_mut(address) {
					Some(cell) => *cell &= self.data,
					None => warn!("programming 0x{:04x} beyond end of flash (0x{:x} bytes), ignored", address, self.memory.len()),
				}
			},
			CMD_ERASE => {
				if !self.programming_enabled() {
					warn!("erase command without programming mode, ignored");
					return;
				}
				for cell in self.memory.iter_mut() {
					*cell = ERASED;
				}
			},
			other => warn!("unknown flash command 0x{:02x}", other),
		}
	}
}

impl FlashRegisters for SimulatedFlash {
	fn write_register(&mut self, register: Register, value: u8) {
		match register {
			Register::AddressLow => self.address = (self.address & 0xff00) | value as u16,
			Register::AddressHigh => self.address = (self.address & 0x00ff) | (value as u16) << 8,
			Register::Data => self.data = value,
			Register::Command => self.execute(value),
			Register::Enable => {
				self.key = match (self.key, value) {
					(_, v) if v == ENABLE_KEY[0] => KeyState::FirstKey,
					(KeyState::FirstKey, v) if v == ENABLE_KEY[1] => KeyState::Unlocked,
					_ => KeyState::Locked,
				};
			},
			Register::Control => {
				if self.key != KeyState::Unlocked {
					warn!("{} written without key, ignored", register);
					return;
				}
				self.mode = value;
				if value == MODE_EXIT {
					self.exit_requested = true;
				}
			},
		}
	}

	fn read_register(&mut self, register: Register) -> u8 {
		match register {
			Register::AddressLow => self.address as u8,
			Register::AddressHigh => (self.address >> 8) as u8,
			Register::Data => self.data,
			Register::Command => 0,
			Register::Enable => 0,
			Register::Control => self.mode,
		}
	}
}

impl Default for SimulatedFlash {
	fn default() -> Self {
		SimulatedFlash::new(DEFAULT_SIZE)
	}
}

impl fmt::Debug for SimulatedFlash {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.debug_struct("SimulatedFlash")
			.field("size", &self.memory.len())
			.field("address", &self.address)
			.field("data", &self.data)
			.field("key", &self.key)
			.field("mode", &self.mode)
			.field("exit_requested", &self.exit_requested)
			.finish()
	}
}
