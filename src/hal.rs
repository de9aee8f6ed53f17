//! Capabilities the firmware core needs from the board.
//!
//! Everything in here is implemented either by real hardware glue or by the
//! simulated board (`i2c::sim`, `loader::sim`); the core never touches pins,
//! timers or the UART directly.

use std::thread;
use std::time::{
	Duration,
	Instant,
};

/// The two open-drain lines of the bus.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Line {
	Clock,
	Data,
}

/// Open-drain pin control.
///
/// `set_high` only releases the line; it reads high once every device on the
/// bus has released it too.
pub trait Gpio {
	fn set_high(&mut self, line: Line);
	fn set_low(&mut self, line: Line);
	fn read(&mut self, line: Line) -> bool;
}

impl<'a, G: ?Sized + Gpio> Gpio for &'a mut G {
	fn set_high(&mut self, line: Line) {
		G::set_high(*self, line)
	}
	fn set_low(&mut self, line: Line) {
		G::set_low(*self, line)
	}
	fn read(&mut self, line: Line) -> bool {
		G::read(*self, line)
	}
}

/// Delay service; on the board a countdown timer plus the idle state.
pub trait Clock {
	fn sleep(&mut self, duration: Duration);
}

impl<'a, C: ?Sized + Clock> Clock for &'a mut C {
	fn sleep(&mut self, duration: Duration) {
		C::sleep(*self, duration)
	}
}

// `thread::sleep` may return early
pub fn reliable_sleep(mut duration: Duration) {
	loop {
		let now = Instant::now();
		thread::sleep(duration);
		let elapsed = now.elapsed();
		if elapsed >= duration {
			return;
		}
		duration -= elapsed;
	}
}

/// Real time delays.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct StdClock;

impl Clock for StdClock {
	fn sleep(&mut self, duration: Duration) {
		reliable_sleep(duration);
	}
}

/// Skips all delays; the relative order of bus operations is unaffected.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct NoDelay;

impl Clock for NoDelay {
	fn sleep(&mut self, _duration: Duration) {
	}
}

/// Remembers every requested delay instead of sleeping.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct RecordingClock {
	pub sleeps: Vec<Duration>,
}

impl Clock for RecordingClock {
	fn sleep(&mut self, duration: Duration) {
		self.sleeps.push(duration);
	}
}
