
use std::f64::consts;
use std::sync::Arc;

use log::{debug, info, trace, warn};
use num_complex::Complex;

use crate::CorrelatorErr;
use crate::gnss::common::acquisition::AcquisitionResult;
use crate::gnss::gps_l1_ca::{CODE_CHIPS_F64, CODE_RATE_CHIPS_PER_SEC, L1_HZ, NUM_CODES};
use crate::gnss::gps_l1_ca::channel::{ActiveChannels, MeasurementSink};
use crate::gnss::gps_l1_ca::config::CorrelatorConfig;
use crate::gnss::gps_l1_ca::replica::ReplicaTables;
use crate::gnss::gps_l1_ca::tracking::{NcoCommand, TrackingLoop};
use crate::io::Packet;

pub mod accumulate;
pub mod measurement;
pub mod state;

pub use self::accumulate::{Correlation, CorrelationEngine};
pub use self::measurement::{Measurement, MeasurementRing};
pub use self::state::{Bins, CorrelatorState, EpochCounters};

/// Value the 20 ms counter is set to when the tracking loop asks for a reset
pub const RESET_20MS_VALUE:u32 = 60;


/// One hardware-style correlator channel: consumes 1 ms sample packets, produces early/prompt/late
/// correlations on every code epoch and a measurement on every tagged packet
pub struct Correlator {
	chan: usize,
	config: CorrelatorConfig,
	tables: Arc<ReplicaTables>,
	active: Arc<ActiveChannels>,

	state: CorrelatorState,
	engine: CorrelationEngine,
	meas: Measurement,
	ring: MeasurementRing,
	last_correlation: Correlation,
	saturation_warned: bool,
}

impl Correlator {

	pub fn new(chan:usize, config:&CorrelatorConfig, tables:Arc<ReplicaTables>, active:Arc<ActiveChannels>) -> Result<Self, CorrelatorErr> {
		config.validate()?;
		if chan >= active.len() { return Err(CorrelatorErr::InvalidChannel(chan)); }
		Ok(Self {
			chan,
			config: config.clone(),
			engine: CorrelationEngine::new(tables.row_len()),
			tables,
			active,
			state: CorrelatorState::default(),
			meas: Measurement::default(),
			ring: MeasurementRing::new(config.ticks_per_second),
			last_correlation: Correlation::default(),
			saturation_warned: false,
		})
	}

	pub fn chan(&self) -> usize { self.chan }
	pub fn state(&self) -> &CorrelatorState { &self.state }
	pub fn is_active(&self) -> bool { self.state.active }
	pub fn saturation_count(&self) -> u64 { self.state.saturations }

	/// Sums accumulated since the last dump
	pub fn pending_correlation(&self) -> &Correlation { self.engine.sums() }

	/// Derotated correlation handed to the tracking loop at the most recent dump
	pub fn last_correlation(&self) -> &Correlation { &self.last_correlation }

	/// Most recently emitted measurement
	pub fn measurement(&self) -> &Measurement { &self.meas }
	pub fn ring(&self) -> &MeasurementRing { &self.ring }

	/// Start tracking from an acquisition taken on packet `result.count`, extrapolating its code
	/// delay forward to packet `count`
	pub fn activate<T:TrackingLoop>(&mut self, result:&AcquisitionResult, count:u64, trk:&mut T) -> Result<(), CorrelatorErr> {
		if result.prn == 0 || result.prn > NUM_CODES { return Err(CorrelatorErr::InvalidPrn(result.prn)); }
		self.active.activate(self.chan, result.prn)?;

		let dt_sec = (count as f64 - result.count as f64) * 0.001;
		let drift_chips = dt_sec * result.doppler_hz * CODE_RATE_CHIPS_PER_SEC / L1_HZ;
		let delay = (result.delay_chips + CODE_CHIPS_F64 + drift_chips).rem_euclid(CODE_CHIPS_F64);

		self.engine.clear();
		self.state = CorrelatorState {
			prn: result.prn,
			active: true,
			navigate: false,
			code_phase: delay,
			code_phase_mod: delay,
			code_nco: CODE_RATE_CHIPS_PER_SEC * (1.0 + result.doppler_hz / L1_HZ),
			carrier_nco: self.config.if_freq_hz + result.doppler_hz,
			..Default::default()
		};
		if self.state.rearm(&self.config) {
			debug!("Channel {}: first epoch of PRN {} starts {:.3} chips into the code, bins clamped until the first dump", self.chan, result.prn, delay);
		}
		self.saturation_warned = false;

		trk.start(result.prn, self.state.carrier_nco, self.state.code_nco, result.class.integration_ms());

		info!("Channel {}: tracking PRN {} ({:?}), doppler={:.1} [Hz], delay={:.3} [chips], rollover={} [samples]",
			self.chan, result.prn, result.class, result.doppler_hz, delay, self.state.rollover);
		Ok(())
	}

	/// Run one packet through the channel.  Measurements are taken even while inactive.
	pub fn process_packet<T, M>(&mut self, packet:&Packet, trk:&mut T, sink:&mut M) -> Result<(), CorrelatorErr>
		where T:TrackingLoop, M:MeasurementSink {

		if let Some(tick) = packet.measurement {
			self.take_measurement(tick, packet.count, sink)?;
		}

		if !self.state.active { return Ok(()); }

		let fs = self.config.sample_freq_hz;
		let mut rest:&[Complex<i16>] = &packet.samples;
		while !rest.is_empty() {
			let n = rest.len().min(self.state.rollover.max(1));
			let (segment, tail) = rest.split_at(n);

			self.engine.accumulate(&self.tables, self.state.prn, &self.state.bins, self.state.scount, segment);
			self.state.update(n, fs);
			rest = tail;

			if self.state.rollover == 0 {
				self.dump(trk);
				if !self.state.active { return Ok(()); }
			}
		}

		Ok(())
	}

	fn take_measurement<M:MeasurementSink>(&mut self, tick:u32, count:u64, sink:&mut M) -> Result<(), CorrelatorErr> {
		let icp = self.config.icp_ticks as i64;
		let current = Measurement::snapshot(self.chan, &self.state, count);
		self.meas = self.ring.advance(tick as i64, icp, current, self.state.carrier_phase);
		sink.deliver(self.meas.clone())
	}

	fn dump<T:TrackingLoop>(&mut self, trk:&mut T) {
		let fs = self.config.sample_freq_hz;
		let f_bin = self.state.bins.carrier_freq_hz(&self.config);
		let fix = consts::PI * (self.state.carrier_nco - f_bin) * (self.state.scount as f64) / fs;

		let mut corr = self.engine.take();
		corr.derotate(-(2.0 * consts::PI * self.state.carrier_phase_prev + fix));
		self.state.carrier_phase_prev = self.state.carrier_phase_mod;

		trace!("Channel {} dump {}: E={} P={} L={} over {} samples", self.chan, self.state.dumps, corr.early, corr.prompt, corr.late, self.state.scount);

		let cmd = trk.accumulate(&corr);
		self.last_correlation = corr;
		self.apply_feedback(&cmd);
		if cmd.kill { return; }

		self.state.dumps += 1;
		if self.state.rearm(&self.config) {
			self.state.saturations += 1;
			if self.saturation_warned {
				debug!("Channel {}: replica bins clamped again ({} total)", self.chan, self.state.saturations);
			} else {
				warn!("Channel {}: PRN {} replica bins clamped, code_phase_mod={:.3} [chips], carrier_nco={:.1} [Hz]",
					self.chan, self.state.prn, self.state.code_phase_mod, self.state.carrier_nco);
				self.saturation_warned = true;
			}
		}
	}

	fn apply_feedback(&mut self, cmd:&NcoCommand) {
		self.state.carrier_nco = cmd.carrier_nco;
		self.state.code_nco = cmd.code_nco;
		self.state.navigate = cmd.navigate;

		if cmd.reset_1ms { self.state.epochs.ms1 = 0; }
		if cmd.reset_20ms { self.state.epochs.ms20 = RESET_20MS_VALUE; }
		if cmd.set_z_count { self.state.epochs.z_count = cmd.z_count; }

		if cmd.kill { self.kill(); }
	}

	/// Give the channel up: clear all tracking state and free its slot in the active-channel
	/// table, whether or not a satellite was being tracked
	pub fn release(&mut self) {
		if self.state.active {
			info!("Channel {}: releasing PRN {} after {} dumps", self.chan, self.state.prn, self.state.dumps);
		}
		self.reset();
	}

	fn kill(&mut self) {
		info!("Channel {}: dropping PRN {} after {} dumps", self.chan, self.state.prn, self.state.dumps);
		self.reset();
	}

	fn reset(&mut self) {
		self.state = CorrelatorState::default();
		self.meas = Measurement::default();
		self.ring.clear();
		self.engine.clear();
		self.active.deactivate(self.chan);
	}

}
