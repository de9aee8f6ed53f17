//! Startup of both firmware images, up to their command loops.
//!
//! Both print `1` and `2` once the serial link is up, then go idle for the
//! wake interval and print `3` when the timer brought them back.

use std::io;
use std::time::Duration;

use crate::bridge::Bridge;
use crate::hal::{
	Clock,
	Gpio,
};
use crate::i2c::I2cMaster;
use crate::loader::{
	Exit,
	FlashRegisters,
	Loader,
};
use crate::sequencer::{
	self,
	ConfigSequence,
	Outcome,
};
use crate::transport::SerialPort;

pub const LINK_UP: [u8; 2] = *b"12";
pub const AWAKE: u8 = b'3';

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct BootTiming {
	/// first idle period after the banner
	pub wake: Duration,
}

impl Default for BootTiming {
	fn default() -> Self {
		BootTiming {
			wake: Duration::from_millis(20),
		}
	}
}

fn link_up<P: SerialPort + ?Sized>(port: &mut P) -> io::Result<()> {
	for &marker in &LINK_UP {
		port.write_byte(marker)?;
	}
	Ok(())
}

fn wake<C: Clock + ?Sized, P: SerialPort + ?Sized>(clock: &mut C, port: &mut P, timing: BootTiming) -> io::Result<()> {
	clock.sleep(timing.wake);
	port.write_byte(AWAKE)
}

/// Banner, bus release, then every bring-up sequence in order.
///
/// A sequence that aborts doesn't keep the following ones from running; each
/// one reports its own progress markers.
pub fn boot_bridge<G, C, K, P>(
	bridge: &mut Bridge<I2cMaster<G, C>, K>,
	port: &mut P,
	timing: BootTiming,
	bring_up: &[ConfigSequence],
) -> io::Result<Vec<Outcome>>
where
	G: Gpio,
	C: Clock,
	K: Clock,
	P: SerialPort + ?Sized,
{
	link_up(port)?;
	wake(bridge.clock_mut(), port, timing)?;
	bridge.bus_mut().release_bus();

	let mut outcomes = Vec::with_capacity(bring_up.len());
	for sequence in bring_up {
		outcomes.push(sequencer::apply(bridge.bus_mut(), port, sequence)?);
	}
	let failed = outcomes.iter().filter(|o| !o.is_completed()).count();
	if failed > 0 {
		warn!("{} of {} bring-up sequences failed", failed, outcomes.len());
	}
	info!("bridge ready");
	Ok(outcomes)
}

pub fn run_bridge<G, C, K, P>(
	bridge: &mut Bridge<I2cMaster<G, C>, K>,
	port: &mut P,
	timing: BootTiming,
	bring_up: &[ConfigSequence],
) -> crate::AResult<()>
where
	G: Gpio,
	C: Clock,
	K: Clock,
	P: SerialPort + ?Sized,
{
	with_context!("bridge startup failed", Ok(boot_bridge(&mut *bridge, &mut *port, timing, bring_up)?))?;
	bridge.serve(port)
}

/// Banner with programming mode enabled during the wake interval.
pub fn boot_loader<R, C, P>(loader: &mut Loader<R, C>, port: &mut P, timing: BootTiming) -> io::Result<()>
where
	R: FlashRegisters,
	C: Clock,
	P: SerialPort + ?Sized,
{
	link_up(port)?;
	// takes effect on the next transition to idle
	loader.flash_mut().enter_programming();
	wake(loader.flash_mut().clock_mut(), port, timing)?;
	info!("loader ready");
	Ok(())
}

pub fn run_loader<R, C, P>(loader: &mut Loader<R, C>, port: &mut P, timing: BootTiming) -> crate::AResult<Exit>
where
	R: FlashRegisters,
	C: Clock,
	P: SerialPort + ?Sized,
{
	with_context!("loader startup failed", Ok(boot_loader(&mut *loader, &mut *port, timing)?))?;
	loader.serve(port)
}
