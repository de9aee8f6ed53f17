use crate::hal::{
	Clock,
	Gpio,
	Line,
};

use super::BusTiming;

pub trait Hardware {
	fn release(&mut self, line: Line);
	fn pull_low(&mut self, line: Line);
	fn read_line(&mut self, line: Line) -> bool;

	// delay for half a bus clock cycle
	fn delay(&mut self);
}

/// Bus master on two GPIO lines.
pub struct I2cMaster<G: Gpio, C: Clock> {
	gpio: G,
	clock: C,
	timing: BusTiming,
}

impl<G: Gpio, C: Clock> I2cMaster<G, C> {
	pub fn new(gpio: G, clock: C, timing: BusTiming) -> Self {
		I2cMaster {
			gpio,
			clock,
			timing,
		}
	}

	pub fn gpio_mut(&mut self) -> &mut G {
		&mut self.gpio
	}

	/// both lines idle-high, then give the devices time to notice
	pub fn release_bus(&mut self) {
		self.gpio.set_high(Line::Clock);
		self.gpio.set_high(Line::Data);
		self.clock.sleep(self.timing.settle);
	}
}

impl<G: Gpio, C: Clock> Hardware for I2cMaster<G, C> {
	fn release(&mut self, line: Line) {
		self.gpio.set_high(line);
	}

	fn pull_low(&mut self, line: Line) {
		self.gpio.set_low(line);
	}

	fn read_line(&mut self, line: Line) -> bool {
		self.gpio.read(line)
	}

	fn delay(&mut self) {
		self.clock.sleep(self.timing.half_cycle);
	}
}
