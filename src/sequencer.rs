//! Bring-up: ordered register writes that configure the video chips.
//!
//! Progress goes to the host as single characters: `.` per accepted write,
//! `@` when a write isn't acknowledged (nothing after it is attempted), `!`
//! once all writes went through. Earlier writes are not undone on abort.

use std::fs;
use std::io;
use std::path::Path;
use std::str;

use crate::i2c::{
	BusAddress,
	Nak,
	RegisterBus,
};
use crate::transport::SerialPort;

pub const STEP_MARKER: u8 = b'.';
pub const ABORT_MARKER: u8 = b'@';
pub const DONE_MARKER: u8 = b'!';

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ConfigStep {
	pub address: BusAddress,
	pub register: u8,
	pub value: u8,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct ConfigSequence {
	steps: Vec<ConfigStep>,
}

impl ConfigSequence {
	pub fn new() -> Self {
		ConfigSequence::default()
	}

	/// register/value table for a single device
	pub fn for_device(address: BusAddress, table: &[(u8, u8)]) -> Self {
		ConfigSequence {
			steps: table.iter().map(|&(register, value)| ConfigStep { address, register, value }).collect(),
		}
	}

	pub fn push(&mut self, step: ConfigStep) {
		self.steps.push(step);
	}

	pub fn steps(&self) -> &[ConfigStep] {
		&self.steps
	}

	pub fn len(&self) -> usize {
		self.steps.len()
	}

	pub fn is_empty(&self) -> bool {
		self.steps.is_empty()
	}

	pub fn load<P: AsRef<Path>>(path: P) -> crate::AResult<Self> {
		let path = path.as_ref();
		with_context!(("couldn't load bring-up sequence {:?}", path), {
			let text = fs::read_to_string(path)?;
			text.parse::<ConfigSequence>()
		})
	}
}

impl str::FromStr for ConfigSequence {
	type Err = ::failure::Error;

	/// One `ADDR REG VALUE` step per line, hex; `#` starts a comment.
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let mut sequence = ConfigSequence::new();
		for (ndx, line) in s.lines().enumerate() {
			let line = match line.find('#') {
				Some(p) => &line[..p],
				None => line,
			};
			let fields: Vec<&str> = line.split_whitespace().collect();
			if fields.is_empty() {
				continue;
			}
			let step = with_context!(("line {}", ndx + 1), {
				ensure!(fields.len() == 3, "expected ADDR REG VALUE, got {} fields", fields.len());
				Ok(ConfigStep {
					address: fields[0].parse()?,
					register: crate::parse_hex_byte(fields[1])?,
					value: crate::parse_hex_byte(fields[2])?,
				})
			})?;
			sequence.push(step);
		}
		Ok(sequence)
	}
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Outcome {
	Completed { steps: usize },
	/// `index` is the failed step; it and everything after it had no effect
	Aborted { index: usize, step: ConfigStep, nak: Nak },
}

impl Outcome {
	pub fn is_completed(&self) -> bool {
		match self {
			Outcome::Completed { .. } => true,
			Outcome::Aborted { .. } => false,
		}
	}
}

/// Apply all steps in order, stopping at the first NAK. No retries.
pub fn apply<B, P>(bus: &mut B, port: &mut P, sequence: &ConfigSequence) -> io::Result<Outcome>
where
	B: RegisterBus + ?Sized,
	P: SerialPort + ?Sized,
{
	for (index, step) in sequence.steps().iter().enumerate() {
		if let Err(nak) = bus.write_register(step.address, step.register, step.value) {
			warn!("bring-up aborted at step {} ({} @0x{:02x} = 0x{:02x}): {}",
				index, step.address, step.register, step.value, nak);
			port.write_byte(ABORT_MARKER)?;
			return Ok(Outcome::Aborted { index, step: *step, nak });
		}
		port.write_byte(STEP_MARKER)?;
	}
	port.write_byte(DONE_MARKER)?;
	debug!("bring-up completed: {} steps", sequence.len());
	Ok(Outcome::Completed { steps: sequence.len() })
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::i2c::Step;
	use crate::transport::ScriptedPort;

	fn address(a: u8) -> BusAddress {
		BusAddress::new(a).unwrap()
	}

	// refuses the data byte of the write with the given (0-based) index
	struct CountingBus {
		writes: Vec<(BusAddress, u8, u8)>,
		fail_at: Option<usize>,
	}

	impl RegisterBus for CountingBus {
		fn write_register(&mut self, address: BusAddress, register: u8, value: u8) -> Result<(), Nak> {
			let ndx = self.writes.len();
			self.writes.push((address, register, value));
			if Some(ndx) == self.fail_at {
				return Err(Nak { address, step: Step::Data });
			}
			Ok(())
		}

		fn read_register(&mut self, _address: BusAddress, _register: u8) -> Result<u8, Nak> {
			panic!("bring-up must not read");
		}
	}

	fn five_steps() -> ConfigSequence {
		ConfigSequence::for_device(address(0x21), &[
			(0x00, 0x01),
			(0x01, 0x02),
			(0x02, 0x03),
			(0x03, 0x04),
			(0x04, 0x05),
		])
	}

	#[test]
	fn stops_at_first_nak() {
		let mut bus = CountingBus { writes: Vec::new(), fail_at: Some(2) };
		let mut port = ScriptedPort::default();

		let outcome = apply(&mut bus, &mut port, &five_steps()).unwrap();

		assert_eq!(bus.writes, vec![
			(address(0x21), 0x00, 0x01),
			(address(0x21), 0x01, 0x02),
			(address(0x21), 0x02, 0x03),
		]);
		assert_eq!(port.output(), b"..@");
		match outcome {
			Outcome::Aborted { index, step, nak } => {
				assert_eq!(index, 2);
				assert_eq!(step, five_steps().steps()[2]);
				assert_eq!(nak.step, Step::Data);
			},
			other => panic!("unexpected outcome {:?}", other),
		}
	}

	#[test]
	fn applies_all_in_order() {
		let mut bus = CountingBus { writes: Vec::new(), fail_at: None };
		let mut port = ScriptedPort::default();

		let outcome = apply(&mut bus, &mut port, &five_steps()).unwrap();

		assert_eq!(outcome, Outcome::Completed { steps: 5 });
		assert!(outcome.is_completed());
		assert_eq!(port.output(), b".....!");
		let registers: Vec<u8> = bus.writes.iter().map(|w| w.1).collect();
		assert_eq!(registers, vec![0, 1, 2, 3, 4]);
	}

	#[test]
	fn empty_sequence_completes() {
		let mut bus = CountingBus { writes: Vec::new(), fail_at: Some(0) };
		let mut port = ScriptedPort::default();
		assert_eq!(apply(&mut bus, &mut port, &ConfigSequence::new()).unwrap(), Outcome::Completed { steps: 0 });
		assert_eq!(port.output(), b"!");
	}

	#[test]
	fn parse_sequence_file() {
		let text = "\
# decoder
21 3d c3   # output control
0x21 0x0f 0x00

2a 00 ff
";
		let sequence: ConfigSequence = text.parse().unwrap();
		assert_eq!(sequence.steps(), &[
			ConfigStep { address: address(0x21), register: 0x3d, value: 0xc3 },
			ConfigStep { address: address(0x21), register: 0x0f, value: 0x00 },
			ConfigStep { address: address(0x2a), register: 0x00, value: 0xff },
		][..]);
	}

	#[test]
	fn parse_errors_name_the_line() {
		for &(text, line) in &[
			("21 3d\n", 1),
			("21 3d c3\n21 3d c3 00\n", 2),
			("21 3d c3\n\n# x\n80 00 00\n", 4),
			("21 3d 1ff\n", 1),
			("21 zz 00\n", 1),
		] {
			let e = text.parse::<ConfigSequence>().unwrap_err();
			let msg = e.to_string();
			assert!(msg.starts_with(&format!("line {}:", line)), "{:?}: unexpected error {:?}", text, msg);
		}
	}
}
