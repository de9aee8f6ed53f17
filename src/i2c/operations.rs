use crate::hal::{
	Clock,
	Gpio,
	Line,
};

use super::{
	BusAddress,
	I2cMaster,
	LowLevel,
	Nak,
	RegisterBus,
	Step,
};

trait Transactions: LowLevel {
	fn send_step(&mut self, address: BusAddress, step: Step, value: u8) -> Result<(), Nak> {
		if self.send_byte(value) {
			debug!("device {}: NAK on {} byte 0x{:02x}", address, step, value);
			return Err(Nak { address, step });
		}
		Ok(())
	}

	fn send_write(&mut self, address: BusAddress, register: u8, value: u8) -> Result<(), Nak> {
		self.start();
		self.send_step(address, Step::Address, address.write_byte())?;
		self.send_step(address, Step::Subaddress, register)?;
		self.send_step(address, Step::Data, value)
	}

	// leaves the device ready to send the register content
	fn select_register(&mut self, address: BusAddress, register: u8) -> Result<(), Nak> {
		self.start();
		self.send_step(address, Step::Address, address.write_byte())?;
		self.send_step(address, Step::Subaddress, register)?;
		self.start();
		self.send_step(address, Step::Address, address.read_byte())
	}
}

impl<H: LowLevel + ?Sized> Transactions for H {
}

impl<G: Gpio, C: Clock> RegisterBus for I2cMaster<G, C> {
	fn write_register(&mut self, address: BusAddress, register: u8, value: u8) -> Result<(), Nak> {
		let result = self.send_write(address, register, value);
		self.stop();
		debug!("write {} @0x{:02x} = 0x{:02x}: {}", address, register, value, if result.is_ok() { "ok" } else { "NAK" });
		result
	}

	fn read_register(&mut self, address: BusAddress, register: u8) -> Result<u8, Nak> {
		if let Err(nak) = self.select_register(address, register) {
			self.stop();
			return Err(nak);
		}
		// recv_byte sends the STOP itself
		let value = self.recv_byte();
		debug!("read {} @0x{:02x} = 0x{:02x}", address, register, value);
		Ok(value)
	}

	fn idle(&mut self) {
		self.gpio_mut().set_high(Line::Clock);
		self.gpio_mut().set_high(Line::Data);
	}
}
