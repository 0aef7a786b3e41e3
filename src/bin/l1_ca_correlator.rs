
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use clap::{Arg, App};
use colored::*;
use log::info;
use tokio::sync::mpsc;

use gps_correlator::CorrelatorErr;
use gps_correlator::gnss::common::acquisition::{AcquisitionClass, AcquisitionResult};
use gps_correlator::gnss::gps_l1_ca::channel::{ChannelBank, PriorityClass};
use gps_correlator::gnss::gps_l1_ca::config::CorrelatorConfig;
use gps_correlator::gnss::gps_l1_ca::correlator::Measurement;
use gps_correlator::gnss::gps_l1_ca::signal_modulation::IfSignal;
use gps_correlator::gnss::gps_l1_ca::tracking::costas::CostasLoop;
use gps_correlator::io::{self, PacketFifo, PacketReader, SyntheticSource, DEFAULT_FIFO_CAPACITY};

/// prn:doppler_hz:delay_chips[:amplitude]
fn parse_synthetic(arg:&str) -> Result<(usize, f64, f64, f64), CorrelatorErr> {
	let bad = CorrelatorErr::InvalidConfig("synthetic satellites are given as prn:doppler_hz:delay_chips[:amplitude]");
	let fields:Vec<&str> = arg.split(':').collect();
	if fields.len() < 3 || fields.len() > 4 { return Err(bad); }
	let prn:usize = fields[0].parse().map_err(|_| bad.clone())?;
	let doppler:f64 = fields[1].parse().map_err(|_| bad.clone())?;
	let delay:f64 = fields[2].parse().map_err(|_| bad.clone())?;
	let amplitude:f64 = match fields.get(3) {
		Some(a) => a.parse().map_err(|_| bad.clone())?,
		None => 500.0,
	};
	Ok((prn, doppler, delay, amplitude))
}

fn parse_arg<T: std::str::FromStr>(value:Option<&str>, what:&'static str) -> Result<Option<T>, CorrelatorErr> {
	match value {
		Some(s) => s.parse().map(Some).map_err(|_| CorrelatorErr::InvalidConfig(what)),
		None => Ok(None),
	}
}

fn run() -> Result<(), CorrelatorErr> {

	let matches = App::new("GPS L1 C/A Correlator")
		.version("0.1.0")
		.author("John Stanford (johnwstanford@gmail.com)")
		.about("Runs a bank of L1 C/A correlator channels over IF samples and prints measurements as JSON")
		.arg(Arg::with_name("filename")
			.short("f").long("filename")
			.help("Input filename, interleaved little-endian i16 I/Q")
			.takes_value(true))
		.arg(Arg::with_name("synthetic")
			.long("synthetic")
			.help("Simulated satellite as prn:doppler_hz:delay_chips[:amplitude]; may be repeated")
			.takes_value(true).multiple(true).number_of_values(1)
			.conflicts_with("filename"))
		.arg(Arg::with_name("noise")
			.long("noise")
			.help("Standard deviation of the simulated receiver noise per I/Q component")
			.takes_value(true))
		.arg(Arg::with_name("duration_ms")
			.long("duration_ms")
			.help("Length of the simulated run")
			.takes_value(true).default_value("2000"))
		.arg(Arg::with_name("acquisitions")
			.short("a").long("acquisitions")
			.help("JSON file with a list of acquisition results to dispatch")
			.takes_value(true))
		.arg(Arg::with_name("config")
			.short("c").long("config")
			.help("JSON file with correlator configuration")
			.takes_value(true))
		.arg(Arg::with_name("channels")
			.short("n").long("channels")
			.takes_value(true).default_value("12"))
		.arg(Arg::with_name("realtime")
			.long("realtime")
			.help("Run channel threads at this SCHED_FIFO priority")
			.takes_value(true))
		.arg(Arg::with_name("pace_us")
			.long("pace_us")
			.help("Delay between packets fed to the channels; 0 feeds as fast as possible")
			.takes_value(true).default_value("1000"))
		.get_matches();

	let config = match matches.value_of("config") {
		Some(path) => CorrelatorConfig::from_json_file(path)?,
		None => CorrelatorConfig::default(),
	};
	let num_channels:usize = parse_arg(matches.value_of("channels"), "channels must be an integer")?.unwrap_or(12);
	let duration_ms:usize = parse_arg(matches.value_of("duration_ms"), "duration_ms must be an integer")?.unwrap_or(2000);
	let noise:f64 = parse_arg(matches.value_of("noise"), "noise must be a number")?.unwrap_or(0.0);
	let pace_us:u64 = parse_arg(matches.value_of("pace_us"), "pace_us must be an integer")?.unwrap_or(1000);
	let priority = match parse_arg::<i32>(matches.value_of("realtime"), "realtime priority must be an integer")? {
		Some(p) => PriorityClass::RealTime(p),
		None => PriorityClass::Normal,
	};

	let synthetic:Vec<(usize, f64, f64, f64)> = match matches.values_of("synthetic") {
		Some(values) => values.map(parse_synthetic).collect::<Result<_, _>>()?,
		None => vec![],
	};
	let filename = matches.value_of("filename").map(|s| s.to_string());
	if filename.is_none() && synthetic.is_empty() {
		return Err(CorrelatorErr::InvalidConfig("either --filename or at least one --synthetic satellite is required"));
	}

	let mut acquisitions:Vec<AcquisitionResult> = match matches.value_of("acquisitions") {
		Some(path) => {
			let text = std::fs::read_to_string(path)?;
			serde_json::from_str(&text).map_err(|_| CorrelatorErr::InvalidConfig("unable to parse acquisition JSON"))?
		},
		None => vec![],
	};
	if acquisitions.is_empty() {
		acquisitions = synthetic.iter().map(|(prn, doppler_hz, delay_chips, _)| AcquisitionResult{
			prn: *prn, doppler_hz: *doppler_hz, delay_chips: *delay_chips, class: AcquisitionClass::Strong, count: 0 }).collect();
	}

	let run = Arc::new(AtomicBool::new(true));
	let r = run.clone();
	ctrlc::set_handler(move || {
		r.store(false, Ordering::SeqCst);
	}).map_err(|e| CorrelatorErr::Spawn(e.to_string()))?;

	let fifo = Arc::new(PacketFifo::new(DEFAULT_FIFO_CAPACITY));
	let mut bank = ChannelBank::new(&config, num_channels, fifo.clone(), run.clone())?;
	let (tx, mut rx) = mpsc::unbounded_channel::<Measurement>();
	let if_freq_hz = config.if_freq_hz;
	bank.start(priority, |_| CostasLoop::new(if_freq_hz), tx)?;

	for acq in acquisitions {
		let prn = acq.prn;
		match bank.dispatch(acq) {
			Ok(chan) => eprintln!("{}", format!("PRN {}: dispatched to channel {}", prn, chan).green()),
			Err(e) => eprintln!("{}", format!("PRN {}: not dispatched, {}", prn, e).red()),
		}
	}

	let pace = if pace_us > 0 { Some(Duration::from_micros(pace_us)) } else { None };
	let pump_fifo = fifo.clone();
	let pump_run = run.clone();
	let pump_config = config.clone();
	let pump = thread::Builder::new().name("packet-source".to_string()).spawn(move || -> Result<u64, CorrelatorErr> {
		match filename {
			Some(fname) => {
				info!("Reading packets from {}", fname);
				let reader = PacketReader::new(BufReader::new(File::open(&fname)?), &pump_config);
				io::pump(reader, &pump_fifo, &pump_run, pace)
			},
			None => {
				let signals = synthetic.iter()
					.map(|(prn, doppler, delay, amp)| IfSignal::new(*prn, pump_config.sample_freq_hz, pump_config.if_freq_hz, *doppler, *delay, *amp))
					.collect::<Result<Vec<_>, _>>()?;
				let src = SyntheticSource::new(signals, noise, &pump_config)?;
				io::pump(src.take(duration_ms).map(Ok), &pump_fifo, &pump_run, pace)
			},
		}
	}).map_err(|e| CorrelatorErr::Spawn(e.to_string()))?;

	// Every sender lives in a worker, so this ends once all channels have stopped
	let mut emitted = 0usize;
	while let Some(meas) = rx.blocking_recv() {
		if meas.prn == 0 { continue; }
		let json = serde_json::to_string(&meas).map_err(|e| CorrelatorErr::Io(e.to_string()))?;
		println!("{}", json);
		emitted += 1;
	}

	let packets = pump.join().map_err(|_| CorrelatorErr::WorkerPanicked)??;
	let stats = bank.join()?;
	for s in stats.iter() {
		let line = format!("Channel {:2}: {} packets, {} skipped, {} activations, {} bin saturations",
			s.chan, s.packets, s.skipped_packets, s.activations, s.saturations);
		if s.skipped_packets > 0 || s.saturations > 0 { eprintln!("{}", line.yellow()); } else { eprintln!("{}", line); }
	}
	eprintln!("{}", format!("{} packets in, {} measurements out", packets, emitted).green().bold());

	Ok(())
}

fn main() {
	env_logger::init();

	if let Err(e) = run() {
		eprintln!("{}", format!("Error: {}", e).red());
		std::process::exit(1);
	}
}
