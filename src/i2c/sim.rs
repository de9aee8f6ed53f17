//! Simulated two-wire bus with register devices.
//!
//! Devices react to line edges the way real slaves do: they sample DATA on
//! the rising CLOCK edge, change DATA only after the falling edge, and detect
//! START/STOP as DATA edges while CLOCK is high. Each device exposes 256
//! 8-bit registers behind an auto-incrementing register pointer.

use std::fmt;
use std::str;

use crate::hal::{
	Gpio,
	Line,
};

use super::BusAddress;

/// Byte of a transaction a device can be told to NAK.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Refusal {
	WriteAddress,
	/// the address byte after the repeated START of a register read
	ReadAddress,
	Subaddress,
	Data,
}

#[derive(Clone, PartialEq, Eq)]
pub struct SimDevice {
	address: BusAddress,
	registers: Vec<u8>,
	pointer: u8,
	responsive: bool,
	refuses: Option<Refusal>,
}

impl SimDevice {
	pub fn new(address: BusAddress) -> Self {
		SimDevice {
			address,
			registers: vec![0u8; 256],
			pointer: 0,
			responsive: true,
			refuses: None,
		}
	}

	/// a device that never acknowledges its address
	pub fn unresponsive(address: BusAddress) -> Self {
		SimDevice {
			responsive: false,
			..SimDevice::new(address)
		}
	}

	/// answer every byte of the given kind with NAK, and ignore its content
	pub fn refusing(mut self, byte: Refusal) -> Self {
		self.refuses = Some(byte);
		self
	}

	pub fn with_register(mut self, register: u8, value: u8) -> Self {
		self.set_register(register, value);
		self
	}

	pub fn register(&self, register: u8) -> u8 {
		self.registers[register as usize]
	}

	pub fn set_register(&mut self, register: u8, value: u8) {
		self.registers[register as usize] = value;
	}

	fn next_read(&mut self) -> u8 {
		let value = self.registers[self.pointer as usize];
		self.pointer = self.pointer.wrapping_add(1);
		value
	}

	fn next_write(&mut self, value: u8) {
		trace!("sim device {}: @0x{:02x} = 0x{:02x}", self.address, self.pointer, value);
		self.registers[self.pointer as usize] = value;
		self.pointer = self.pointer.wrapping_add(1);
	}
}

impl fmt::Debug for SimDevice {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.debug_struct("SimDevice")
			.field("address", &self.address)
			.field("pointer", &self.pointer)
			.field("responsive", &self.responsive)
			.field("refuses", &self.refuses)
			.finish()
	}
}

/// What happened on the wire, from the devices' point of view.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum BusEvent {
	Start,
	Stop,
	/// byte sent by the master and whether any device acknowledged it
	Written { value: u8, acked: bool },
	/// byte sent by a device and whether the master acknowledged it
	Read { value: u8, acked: bool },
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Stage {
	Address,
	Subaddress,
	Data,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum State {
	Idle,
	Receiving { value: u8, bits: u8 },
	// device answers the received byte during the 9th clock
	Acknowledging { ack: bool },
	// `bits`: number of bits already put on DATA
	Sending { value: u8, bits: u8 },
	AwaitingAck { value: u8 },
	Acked { ack: bool },
}

pub struct SimBus {
	devices: Vec<SimDevice>,
	// lines released by the master
	master_clock: bool,
	master_data: bool,
	device_data_low: bool,
	stretch: u32,
	stretching: u32,
	stretched_cycles: u64,
	state: State,
	stage: Stage,
	selected: Option<usize>,
	reading: bool,
	events: Vec<BusEvent>,
}

impl SimBus {
	pub fn new() -> Self {
		SimBus {
			devices: Vec::new(),
			master_clock: true,
			master_data: true,
			device_data_low: false,
			stretch: 0,
			stretching: 0,
			stretched_cycles: 0,
			state: State::Idle,
			stage: Stage::Address,
			selected: None,
			reading: false,
			events: Vec::new(),
		}
	}

	pub fn with_device(mut self, device: SimDevice) -> Self {
		self.add_device(device);
		self
	}

	pub fn add_device(&mut self, device: SimDevice) {
		self.devices.retain(|d| d.address != device.address);
		self.devices.push(device);
	}

	pub fn device(&self, address: BusAddress) -> Option<&SimDevice> {
		self.devices.iter().find(|d| d.address == address)
	}

	pub fn device_mut(&mut self, address: BusAddress) -> Option<&mut SimDevice> {
		self.devices.iter_mut().find(|d| d.address == address)
	}

	/// Hold CLOCK low for `reads` polls after every release by the master.
	pub fn set_clock_stretch(&mut self, reads: u32) {
		self.stretch = reads;
	}

	pub fn stretched_cycles(&self) -> u64 {
		self.stretched_cycles
	}

	pub fn events(&self) -> &[BusEvent] {
		&self.events
	}

	pub fn take_events(&mut self) -> Vec<BusEvent> {
		std::mem::replace(&mut self.events, Vec::new())
	}

	/// both lines high and no transaction in progress
	pub fn is_idle(&self) -> bool {
		self.clock_level() && self.data_level() && self.state == State::Idle
	}

	fn clock_level(&self) -> bool {
		self.master_clock && 0 == self.stretching
	}

	fn data_level(&self) -> bool {
		self.master_data && !self.device_data_low
	}

	fn set_master(&mut self, line: Line, released: bool) {
		let clock = self.clock_level();
		let data = self.data_level();

		match line {
			Line::Clock => {
				if self.master_clock == released {
					return;
				}
				self.master_clock = released;
				self.stretching = if released { self.stretch } else { 0 };
			},
			Line::Data => self.master_data = released,
		}

		let new_clock = self.clock_level();
		let new_data = self.data_level();
		if clock != new_clock {
			if new_clock {
				self.clock_rising();
			} else {
				self.clock_falling();
			}
		} else if clock && data != new_data {
			if new_data {
				self.stop_condition();
			} else {
				self.start_condition();
			}
		}
	}

	fn start_condition(&mut self) {
		self.events.push(BusEvent::Start);
		self.state = State::Receiving { value: 0, bits: 0 };
		self.stage = Stage::Address;
		self.selected = None;
		self.reading = false;
		self.device_data_low = false;
	}

	fn stop_condition(&mut self) {
		self.events.push(BusEvent::Stop);
		self.state = State::Idle;
		self.selected = None;
		self.device_data_low = false;
	}

	fn clock_rising(&mut self) {
		let data = self.data_level();
		self.state = match self.state {
			State::Receiving { value, bits } if bits < 8 => {
				State::Receiving { value: value << 1 | data as u8, bits: bits + 1 }
			},
			State::AwaitingAck { value } => {
				let ack = !data;
				self.events.push(BusEvent::Read { value, acked: ack });
				State::Acked { ack }
			},
			other => other,
		};
	}

	fn clock_falling(&mut self) {
		self.state = match self.state {
			State::Receiving { value, bits: 8 } => {
				let ack = self.accept(value);
				self.device_data_low = ack;
				State::Acknowledging { ack }
			},
			State::Acknowledging { ack } => {
				self.device_data_low = false;
				if ack && self.reading {
					self.send_next()
				} else {
					State::Receiving { value: 0, bits: 0 }
				}
			},
			State::Sending { value, bits } if bits < 8 => {
				self.drive_bit(value, bits);
				State::Sending { value, bits: bits + 1 }
			},
			State::Sending { value, .. } => {
				self.device_data_low = false;
				State::AwaitingAck { value }
			},
			State::Acked { ack: true } => self.send_next(),
			State::Acked { ack: false } => State::Idle,
			other => other,
		};
	}

	// handle a complete byte from the master; returns whether to ACK it
	fn accept(&mut self, value: u8) -> bool {
		let ack = match self.stage {
			Stage::Address => {
				let address = value >> 1;
				self.reading = 0 != value & 1;
				let refusal = if self.reading { Refusal::ReadAddress } else { Refusal::WriteAddress };
				self.selected = self.devices.iter().position(|d| {
					d.responsive && d.address.get() == address && d.refuses != Some(refusal)
				});
				self.stage = Stage::Subaddress;
				self.selected.is_some()
			},
			Stage::Subaddress => {
				self.stage = Stage::Data;
				match self.selected {
					Some(ndx) if self.devices[ndx].refuses != Some(Refusal::Subaddress) => {
						self.devices[ndx].pointer = value;
						true
					},
					_ => false,
				}
			},
			Stage::Data => match self.selected {
				Some(ndx) if self.devices[ndx].refuses != Some(Refusal::Data) => {
					self.devices[ndx].next_write(value);
					true
				},
				_ => false,
			},
		};
		self.events.push(BusEvent::Written { value, acked: ack });
		ack
	}

	fn send_next(&mut self) -> State {
		let value = match self.selected {
			Some(ndx) => self.devices[ndx].next_read(),
			None => 0xff,
		};
		self.drive_bit(value, 0);
		State::Sending { value, bits: 1 }
	}

	fn drive_bit(&mut self, value: u8, bit: u8) {
		self.device_data_low = 0 == value & (0x80 >> bit);
	}
}

impl Default for SimBus {
	fn default() -> Self {
		SimBus::new()
	}
}

impl Gpio for SimBus {
	fn set_high(&mut self, line: Line) {
		self.set_master(line, true);
	}

	fn set_low(&mut self, line: Line) {
		self.set_master(line, false);
	}

	fn read(&mut self, line: Line) -> bool {
		match line {
			Line::Clock => {
				if self.master_clock && self.stretching > 0 {
					self.stretching -= 1;
					self.stretched_cycles += 1;
					if 0 == self.stretching {
						self.clock_rising();
					}
				}
				self.clock_level()
			},
			Line::Data => self.data_level(),
		}
	}
}

/// Initial register content for a simulated device: `ADDR:REG=VALUE` in hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RegisterPreset {
	pub address: BusAddress,
	pub register: u8,
	pub value: u8,
}

impl str::FromStr for RegisterPreset {
	type Err = ::failure::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let colon = match s.find(':') {
			Some(p) => p,
			None => bail!("expected ADDR:REG=VALUE, missing ':' in {:?}", s),
		};
		let eq = match s.find('=') {
			Some(p) if p > colon => p,
			_ => bail!("expected ADDR:REG=VALUE, missing '=' in {:?}", s),
		};
		Ok(RegisterPreset {
			address: s[..colon].parse()?,
			register: crate::parse_hex_byte(&s[colon + 1..eq])?,
			value: crate::parse_hex_byte(&s[eq + 1..])?,
		})
	}
}

impl SimBus {
	/// Applies a preset, adding the device if it doesn't exist yet.
	pub fn preset(&mut self, preset: RegisterPreset) {
		if self.device(preset.address).is_none() {
			self.add_device(SimDevice::new(preset.address));
		}
		if let Some(device) = self.device_mut(preset.address) {
			device.set_register(preset.register, preset.value);
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn address(a: u8) -> BusAddress {
		BusAddress::new(a).unwrap()
	}

	#[test]
	fn parse_presets() {
		let p: RegisterPreset = "21:10=37".parse().unwrap();
		assert_eq!(p, RegisterPreset { address: address(0x21), register: 0x10, value: 0x37 });
		let p: RegisterPreset = "0x7f:0xff=0x00".parse().unwrap();
		assert_eq!(p, RegisterPreset { address: address(0x7f), register: 0xff, value: 0x00 });

		for bad in &["", "21", "21:10", "21=10:37", "80:10=37", "21:100=37", "zz:10=37"] {
			assert!(bad.parse::<RegisterPreset>().is_err(), "{:?} must not parse", bad);
		}
	}

	#[test]
	fn preset_adds_device() {
		let mut bus = SimBus::new();
		bus.preset("21:10=37".parse().unwrap());
		assert_eq!(bus.device(address(0x21)).unwrap().register(0x10), 0x37);
		bus.preset("21:11=38".parse().unwrap());
		assert_eq!(bus.device(address(0x21)).unwrap().register(0x10), 0x37);
		assert_eq!(bus.device(address(0x21)).unwrap().register(0x11), 0x38);
	}

	#[test]
	fn start_and_stop_need_clock_high() {
		let mut bus = SimBus::new();
		bus.set_low(Line::Clock);
		bus.set_low(Line::Data);
		bus.set_high(Line::Data);
		assert!(bus.events().is_empty());

		bus.set_low(Line::Data);
		bus.set_high(Line::Clock);
		bus.set_high(Line::Data);
		assert_eq!(bus.take_events(), vec![BusEvent::Stop]);

		bus.set_low(Line::Data);
		assert_eq!(bus.take_events(), vec![BusEvent::Start]);
	}

	#[test]
	fn stretching_delays_rising_edge() {
		let mut bus = SimBus::new();
		bus.set_clock_stretch(2);
		bus.set_low(Line::Clock);
		bus.set_high(Line::Clock);
		assert!(!bus.read(Line::Clock));
		assert!(bus.read(Line::Clock));
		assert!(bus.read(Line::Clock));
		assert_eq!(bus.stretched_cycles(), 2);
	}
}
