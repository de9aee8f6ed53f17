use crate::hal::Line;

use super::Hardware;

/// Bit and byte level bus primitives.
///
/// Every primitive except `stop` leaves CLOCK pulled low, so DATA may change
/// afterwards without being mistaken for a START or STOP condition.
pub trait LowLevel: Hardware {
	// a device may hold the line low (clock stretching, or driving DATA);
	// there is no timeout.
	fn wait_high(&mut self, line: Line) {
		while !self.read_line(line) {}
	}

	// DATA falls while CLOCK is high; also works as repeated start
	fn start(&mut self) {
		self.release(Line::Data);
		self.release(Line::Clock);
		self.wait_high(Line::Clock);
		self.delay();
		self.pull_low(Line::Data);
		self.delay();
		self.pull_low(Line::Clock);
	}

	// DATA rises while CLOCK is high; leaves both lines idle-high
	fn stop(&mut self) {
		self.pull_low(Line::Data);
		self.delay();
		self.release(Line::Clock);
		self.wait_high(Line::Clock);
		self.delay();
		self.release(Line::Data);
		self.delay();
	}

	fn send_bit(&mut self, bit: bool) {
		if bit {
			self.release(Line::Data);
			// nobody else may drive DATA while we send
			self.wait_high(Line::Data);
		} else {
			self.pull_low(Line::Data);
		}
		self.delay();
		self.release(Line::Clock);
		self.wait_high(Line::Clock);
		self.delay();
		self.pull_low(Line::Clock);
	}

	// device drives DATA while CLOCK is low; sample once CLOCK is really high
	fn recv_bit(&mut self) -> bool {
		self.release(Line::Data);
		self.delay();
		self.release(Line::Clock);
		self.wait_high(Line::Clock);
		let bit = self.read_line(Line::Data);
		self.delay();
		self.pull_low(Line::Clock);
		bit
	}

	/// Send a byte MSB first; returns `true` if the device answered NAK.
	fn send_byte(&mut self, value: u8) -> bool {
		for bit in (0..8).rev() {
			self.send_bit(0 != value & (1 << bit));
		}
		let nak = self.recv_bit();
		trace!("sent 0x{:02x}: {}", value, if nak { "NAK" } else { "ACK" });
		nak
	}

	/// Receive a byte MSB first, then NAK it and end the transaction.
	///
	/// Reads only ever fetch a single byte, so there is no variant that ACKs.
	fn recv_byte(&mut self) -> u8 {
		let mut value = 0u8;
		for _ in 0..8 {
			value = value << 1 | self.recv_bit() as u8;
		}
		self.send_bit(true);
		self.stop();
		trace!("received 0x{:02x}", value);
		value
	}
}

impl<H: Hardware + ?Sized> LowLevel for H {
}

#[cfg(test)]
mod test {
	use super::*;

	#[derive(Clone, Copy, PartialEq, Eq, Debug)]
	enum Op {
		Release(Line),
		PullLow(Line),
	}

	// nobody else drives the lines; samples taken while CLOCK is high return
	// the scripted bits
	struct Recorder {
		ops: Vec<Op>,
		clock: bool,
		data: bool,
		samples: Vec<bool>,
	}

	impl Recorder {
		fn new(samples: Vec<bool>) -> Self {
			Recorder {
				ops: Vec::new(),
				clock: true,
				data: true,
				samples,
			}
		}
	}

	impl Hardware for Recorder {
		fn release(&mut self, line: Line) {
			self.ops.push(Op::Release(line));
			match line {
				Line::Clock => self.clock = true,
				Line::Data => self.data = true,
			}
		}
		fn pull_low(&mut self, line: Line) {
			self.ops.push(Op::PullLow(line));
			match line {
				Line::Clock => self.clock = false,
				Line::Data => self.data = false,
			}
		}
		fn read_line(&mut self, line: Line) -> bool {
			match line {
				Line::Clock => self.clock,
				Line::Data if !self.data => false,
				Line::Data if self.clock && !self.samples.is_empty() => self.samples.remove(0),
				Line::Data => true,
			}
		}
		fn delay(&mut self) {
		}
	}

	const RECV_BIT: [Op; 3] = [
		Op::Release(Line::Data),
		Op::Release(Line::Clock),
		Op::PullLow(Line::Clock),
	];

	const NAK_AND_STOP: [Op; 6] = [
		// NAK: DATA stays released for the 9th clock
		Op::Release(Line::Data),
		Op::Release(Line::Clock),
		Op::PullLow(Line::Clock),
		// STOP
		Op::PullLow(Line::Data),
		Op::Release(Line::Clock),
		Op::Release(Line::Data),
	];

	fn check_recv_byte(value: u8) {
		let mut hw = Recorder::new((0..8).rev().map(|bit| 0 != value & (1 << bit)).collect());

		assert_eq!(hw.recv_byte(), value);
		assert!(hw.samples.is_empty(), "all 8 bits sampled for 0x{:02x}", value);

		assert_eq!(hw.ops.len(), 8 * RECV_BIT.len() + NAK_AND_STOP.len());
		for bit in hw.ops[..24].chunks(3) {
			assert_eq!(bit, &RECV_BIT[..], "receiving 0x{:02x}", value);
		}
		assert_eq!(&hw.ops[24..], &NAK_AND_STOP[..], "finishing 0x{:02x}", value);
	}

	#[test]
	fn recv_byte_always_naks_and_stops() {
		for &value in &[0x00, 0xff, 0x37, 0x80, 0x01, 0xa5] {
			check_recv_byte(value);
		}
	}

	#[test]
	fn send_byte_msb_first() {
		// ninth sample is the ACK bit
		let mut hw = Recorder::new(vec![false]);
		assert!(!hw.send_byte(0x42));

		let data: Vec<Op> = hw.ops.iter()
			.cloned()
			.filter(|op| match op {
				Op::Release(Line::Data) | Op::PullLow(Line::Data) => true,
				_ => false,
			})
			.collect();
		use self::Op::*;
		use crate::hal::Line::Data;
		assert_eq!(data, vec![
			PullLow(Data), Release(Data), PullLow(Data), PullLow(Data),
			PullLow(Data), PullLow(Data), Release(Data), PullLow(Data),
			// released for the ACK bit
			Release(Data),
		]);
	}

	#[test]
	fn send_byte_reports_nak() {
		let mut hw = Recorder::new(vec![true]);
		assert!(hw.send_byte(0x42));
	}

	#[test]
	fn start_from_idle() {
		let mut hw = Recorder::new(Vec::new());
		hw.start();
		assert_eq!(hw.ops, vec![
			Op::Release(Line::Data),
			Op::Release(Line::Clock),
			Op::PullLow(Line::Data),
			Op::PullLow(Line::Clock),
		]);
	}
}
