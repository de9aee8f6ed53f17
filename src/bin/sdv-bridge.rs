#[macro_use]
extern crate clap;
#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;

extern crate sdv_bridge;
use sdv_bridge::*;

use std::process::exit;
use std::str::FromStr;
use std::time::Duration;

use sdv_bridge::bridge::Bridge;
use sdv_bridge::firmware::BootTiming;
use sdv_bridge::hal::{
	Clock,
	NoDelay,
	StdClock,
};
use sdv_bridge::i2c::{
	BusAddress,
	BusTiming,
	I2cMaster,
	sim::{
		RegisterPreset,
		SimBus,
		SimDevice,
	},
};
use sdv_bridge::lock::LockProbe;
use sdv_bridge::sequencer::ConfigSequence;
use sdv_bridge::transport::{
	self,
	FdPort,
};

fn parse_param<T>(name: &str, value: &str) -> AResult<T>
where
	T: FromStr,
	failure::Error: From<<T as FromStr>::Err>,
{
	value.parse::<T>().map_err(|e| {
		let e = failure::Error::from(e);
		let msg = format!("invalid parameter --{} {:?}: {}", name, value, e);
		e.context(msg).into()
	})
}

fn get_params<T>(matches: &clap::ArgMatches, name: &str) -> AResult<Vec<T>>
where
	T: FromStr,
	failure::Error: From<<T as FromStr>::Err>,
{
	matches.values_of(name).into_iter().flatten().map(|v| parse_param(name, v)).collect()
}

fn run<C: Clock>(
	bus: &mut SimBus,
	clock: C,
	timing: BusTiming,
	probe: Option<LockProbe>,
	port: &mut FdPort,
	bring_up: &[ConfigSequence],
) -> AResult<()> {
	// idle waits always happen in real time, otherwise a quiet host means a busy loop
	let mut bridge = Bridge::new(I2cMaster::new(bus, clock, timing), StdClock);
	if let Some(probe) = probe {
		info!("polling lock status of {} register 0x{:02x}", probe.address, probe.status_register);
		bridge = bridge.with_lock_probe(probe);
	}
	firmware::run_bridge(&mut bridge, port, BootTiming::default(), bring_up)?;
	info!("last video input state: {}", bridge.lock_state());
	Ok(())
}

fn main_app() -> AResult<()> {
	let matches = clap_app!(@app (app_from_crate!())
		(@arg port: -p --port +takes_value "serial device or pty to use as link to the host (default: stdin/stdout)")
		(@arg half_cycle: --("half-cycle-ns") +takes_value "half bus clock cycle in nanoseconds (default: 12500, 40 kHz)")
		(@arg realtime: --realtime "really wait for bus clock and settle delays")
		(@arg device: -d --device +takes_value +multiple "add simulated device with (hex) bus address")
		(@arg register: -r --register +takes_value +multiple "preset simulated register: ADDR:REG=VALUE (hex)")
		(@arg bring_up: -b --("bring-up") +takes_value +multiple "bring-up sequence file to apply at startup")
		(@arg stretch: --stretch +takes_value "simulated devices hold the clock low for this many polls after each release")
		(@arg lock_probe: --("lock-probe") +takes_value "poll video decoder lock status: ADDR[:REG] (hex)")
	).get_matches();

	let mut timing = BusTiming::default();
	if let Some(ns) = matches.value_of("half_cycle") {
		let ns: u64 = parse_param("half-cycle-ns", ns)?;
		ensure!(ns > 0, "half cycle must not be zero");
		timing.half_cycle = Duration::from_nanos(ns);
	}

	let mut bus = SimBus::new();
	if let Some(reads) = matches.value_of("stretch") {
		bus.set_clock_stretch(parse_param("stretch", reads)?);
	}
	for address in get_params::<BusAddress>(&matches, "device")? {
		bus.add_device(SimDevice::new(address));
	}
	for preset in get_params::<RegisterPreset>(&matches, "register")? {
		bus.preset(preset);
	}

	let bring_up = matches.values_of("bring_up").into_iter().flatten()
		.map(ConfigSequence::load)
		.collect::<AResult<Vec<_>>>()?;
	let probe = match matches.value_of("lock_probe") {
		Some(p) => Some(parse_param::<LockProbe>("lock-probe", p)?),
		None => None,
	};

	let mut port = transport::open_link(matches.value_of("port"))?;

	if matches.is_present("realtime") {
		run(&mut bus, StdClock, timing, probe, &mut port, &bring_up)?;
	} else {
		run(&mut bus, NoDelay, timing, probe, &mut port, &bring_up)?;
	}

	if bus.stretched_cycles() > 0 {
		debug!("devices stretched the clock for {} reads", bus.stretched_cycles());
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
