#[macro_use]
extern crate clap;
#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;

extern crate sdv_bridge;
use sdv_bridge::*;

use std::process::exit;

use sdv_bridge::firmware::BootTiming;
use sdv_bridge::hal::{
	Clock,
	NoDelay,
	StdClock,
};
use sdv_bridge::loader::{
	Exit,
	Flash,
	Loader,
	LoaderTiming,
	sim::{
		self,
		SimulatedFlash,
	},
};
use sdv_bridge::transport::{
	self,
	FdPort,
};

fn run<C: Clock>(flash: &mut SimulatedFlash, clock: C, port: &mut FdPort) -> AResult<Exit> {
	let mut loader = Loader::new(Flash::new(flash, clock, LoaderTiming::default()));
	let stopped = firmware::run_loader(&mut loader, port, BootTiming::default())?;
	debug!("cursor at exit: 0x{:04x}", loader.cursor());
	Ok(stopped)
}

fn main_app() -> AResult<()> {
	let matches = clap_app!(@app (app_from_crate!())
		(@arg port: -p --port +takes_value "serial device or pty to use as link to the host (default: stdin/stdout)")
		(@arg realtime: --realtime "really wait for flash settle times")
		(@arg image: -i --image +takes_value "initial program memory content (default: erased)")
		(@arg size: -s --size +takes_value "program memory size in bytes (default: 32768)")
		(@arg save: --save +takes_value "write program memory content to this file when done")
	).get_matches();

	let size = match matches.value_of("size") {
		Some(s) => s.parse::<usize>().map_err(|e| {
			let msg = format!("invalid parameter --size {:?}: {}", s, e);
			failure::Error::from(e).context(msg)
		})?,
		None => sim::DEFAULT_SIZE,
	};
	ensure!(size > 0 && size <= 0x1_0000, "program memory size must be within the 16-bit address space, got {}", size);

	let mut flash = match matches.value_of("image") {
		Some(path) => SimulatedFlash::load(path, size)?,
		None => SimulatedFlash::new(size),
	};

	let mut port = transport::open_link(matches.value_of("port"))?;

	let stopped = if matches.is_present("realtime") {
		run(&mut flash, StdClock, &mut port)?
	} else {
		run(&mut flash, NoDelay, &mut port)?
	};
	info!("loader stopped: {}", stopped);

	if let Some(path) = matches.value_of("save") {
		flash.save(path)?;
		info!("saved program memory to {:?}", path);
	}
	Ok(())
}

fn main() {
	env_logger::from_env(env_logger::Env::default().default_filter_or("info")).init();

	if let Err(e) = main_app() {
		error!("Error: {}", e);
		exit(1);
	}
}
