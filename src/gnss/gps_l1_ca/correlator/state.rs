
use serde::{Serialize, Deserialize};

use crate::gnss::gps_l1_ca::{CODE_CHIPS_F64, SECONDS_IN_WEEK};
use crate::gnss::gps_l1_ca::config::CorrelatorConfig;

pub const MS_PER_20MS:u32 = 20;
pub const BITS_PER_SUBFRAME_PERIOD:u32 = 300;
pub const Z_COUNT_STEP:u32 = 6;

/// Code epoch counters at the three time scales the navigation message is built on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochCounters {
	pub ms1: u32,
	pub ms20: u32,
	pub z_count: u32,
}

impl EpochCounters {

	/// Advance by `n` completed code epochs, carrying into the 20 ms counter and the Z-count
	pub fn advance(&mut self, n:u32) {
		self.ms1 += n;
		if self.ms1 >= MS_PER_20MS {
			self.ms1 %= MS_PER_20MS;
			self.ms20 += 1;
			if self.ms20 >= BITS_PER_SUBFRAME_PERIOD {
				self.ms20 = 0;
				self.z_count += Z_COUNT_STEP;
				if self.z_count > SECONDS_IN_WEEK {
					self.z_count = 0;
				}
			}
		}
	}

}

/// Indices of the replica rows currently in use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bins {
	pub carrier: usize,
	/// Early, prompt, late
	pub code: [usize; 3],
}

/// Chip offsets of the early, prompt and late taps
pub const TAP_OFFSETS_CHIPS:[f64; 3] = [0.5, 0.0, -0.5];

impl Bins {

	/// Bins for the given wrapped code phase and carrier NCO.  The second value is true when any
	/// index had to be clamped into the table.
	pub fn select(code_phase_mod:f64, carrier_nco:f64, config:&CorrelatorConfig) -> (Self, bool) {
		let c = config.code_bins as i64;
		let d = config.carrier_bins as i64;
		let mut saturated = false;

		let mut clamp = |bin:i64, max:i64| -> usize {
			if bin < 0 || bin > max { saturated = true; }
			bin.max(0).min(max) as usize
		};

		let mut code = [0usize; 3];
		for (bin, offset) in code.iter_mut().zip(TAP_OFFSETS_CHIPS.iter()) {
			let raw = ((code_phase_mod + offset) * (c as f64) + 0.5).floor() as i64 + c/2;
			*bin = clamp(raw, 2*c);
		}

		let raw = ((carrier_nco - config.if_freq_hz) / config.carrier_spacing_hz + 0.5).floor() as i64 + d;
		let carrier = clamp(raw, 2*d);

		(Self{ carrier, code }, saturated)
	}

	/// Center frequency of the carrier row in use [Hz]
	pub fn carrier_freq_hz(&self, config:&CorrelatorConfig) -> f64 {
		(self.carrier as f64 - config.carrier_bins as f64) * config.carrier_spacing_hz + config.if_freq_hz
	}

}

/// Everything a channel knows about the signal it is following.  Phases are in chips (code) and
/// cycles (carrier); rates in chips/s and Hz.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelatorState {
	pub prn: usize,
	pub active: bool,
	pub navigate: bool,

	pub code_phase: f64,
	pub code_phase_mod: f64,
	pub carrier_phase: f64,
	pub carrier_phase_mod: f64,
	pub carrier_phase_prev: f64,
	pub code_nco: f64,
	pub carrier_nco: f64,

	pub epochs: EpochCounters,

	/// Samples left before the next code epoch boundary
	pub rollover: usize,
	/// Samples accumulated since the last dump; also the offset into the replica rows
	pub scount: usize,
	pub bins: Bins,

	pub dumps: u64,
	pub saturations: u64,
}

impl CorrelatorState {

	/// Advance phases and counters by `samps` samples
	pub fn update(&mut self, samps:usize, fs:f64) {
		let dt = samps as f64 / fs;
		let dcode = dt * self.code_nco;
		let dcarrier = dt * self.carrier_nco;

		self.code_phase += dcode;
		self.carrier_phase += dcarrier;
		self.code_phase_mod += dcode;
		self.carrier_phase_mod += dcarrier;

		if self.code_phase_mod >= 2.0*CODE_CHIPS_F64 {
			self.epochs.advance(2);
		} else if self.code_phase_mod >= CODE_CHIPS_F64 {
			self.epochs.advance(1);
		}

		self.code_phase_mod = self.code_phase_mod.rem_euclid(CODE_CHIPS_F64);
		self.carrier_phase_mod = self.carrier_phase_mod.rem_euclid(1.0);

		self.rollover = self.rollover.saturating_sub(samps);
		self.scount += samps;
	}

	/// Samples until the wrapped code phase reaches the end of the epoch, never less than one
	pub fn compute_rollover(&self, fs:f64) -> usize {
		if !(self.code_nco > 0.0) { return 1; }
		let samps = ((CODE_CHIPS_F64 - self.code_phase_mod) * fs / self.code_nco).ceil();
		if samps < 1.0 { 1 } else { samps as usize }
	}

	/// Recompute the rollover point and the replica rows, and restart the row offset.  Returns
	/// true if a bin had to be clamped.
	pub fn rearm(&mut self, config:&CorrelatorConfig) -> bool {
		self.rollover = self.compute_rollover(config.sample_freq_hz);
		let (bins, saturated) = Bins::select(self.code_phase_mod, self.carrier_nco, config);
		self.bins = bins;
		self.scount = 0;
		saturated
	}

}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn one_ms_counter_carries_into_20ms() {
		let mut e = EpochCounters{ ms1: 19, ms20: 4, z_count: 12 };
		e.advance(1);
		assert_eq!(e, EpochCounters{ ms1: 0, ms20: 5, z_count: 12 });
		let mut e = EpochCounters{ ms1: 19, ms20: 4, z_count: 12 };
		e.advance(2);
		assert_eq!(e, EpochCounters{ ms1: 1, ms20: 5, z_count: 12 });
	}

	#[test]
	fn z_count_steps_and_wraps() {
		let mut e = EpochCounters{ ms1: 19, ms20: 299, z_count: 600 };
		e.advance(1);
		assert_eq!(e, EpochCounters{ ms1: 0, ms20: 0, z_count: 606 });

		let mut e = EpochCounters{ ms1: 19, ms20: 299, z_count: SECONDS_IN_WEEK };
		e.advance(1);
		assert_eq!(e.z_count, 0);

		// Exactly one week is still a valid count
		let mut e = EpochCounters{ ms1: 19, ms20: 299, z_count: SECONDS_IN_WEEK - 6 };
		e.advance(1);
		assert_eq!(e.z_count, SECONDS_IN_WEEK);
	}

	#[test]
	fn prompt_bin_tracks_code_phase() {
		let config = CorrelatorConfig::default();
		let (bins, saturated) = Bins::select(0.0, config.if_freq_hz, &config);
		assert!(!saturated);
		assert_eq!(bins.code, [10, 5, 0]);
		assert_eq!(bins.carrier, config.carrier_bins);

		let (bins, _) = Bins::select(0.26, config.if_freq_hz + 1234.0, &config);
		assert_eq!(bins.code, [13, 8, 3]);
		assert_eq!(bins.carrier, config.carrier_bins + 25);
		assert_eq!(bins.carrier_freq_hz(&config), config.if_freq_hz + 1250.0);
	}

	#[test]
	fn bins_clamp_and_report_saturation() {
		let config = CorrelatorConfig::default();
		let (bins, saturated) = Bins::select(512.0, config.if_freq_hz - 50.0e3, &config);
		assert!(saturated);
		assert_eq!(bins.code, [20, 20, 20]);
		assert_eq!(bins.carrier, 0);
	}

	#[test]
	fn rollover_is_never_zero() {
		let config = CorrelatorConfig::default();
		let mut state = CorrelatorState{ code_nco: 1.023e6, code_phase_mod: 1022.9999999, ..Default::default() };
		assert_eq!(state.compute_rollover(config.sample_freq_hz), 1);
		state.code_phase_mod = 0.0;
		assert_eq!(state.compute_rollover(config.sample_freq_hz), 2048);
	}

	#[test]
	fn update_wraps_phases() {
		let fs = 2.048e6;
		let mut state = CorrelatorState{ code_nco: 1.023e6, carrier_nco: 604.0e3, code_phase_mod: 1000.0, code_phase: 1000.0, rollover: 47, ..Default::default() };
		state.update(2048, fs);
		assert!(state.code_phase_mod >= 0.0 && state.code_phase_mod < CODE_CHIPS_F64);
		assert!((state.code_phase_mod - 1000.0).abs() < 1.0e-9);
		assert!((state.code_phase - 2023.0).abs() < 1.0e-9);
		assert!(state.carrier_phase_mod >= 0.0 && state.carrier_phase_mod < 1.0);
		assert_eq!(state.epochs.ms1, 1);
		assert_eq!(state.rollover, 0);
		assert_eq!(state.scount, 2048);
	}
}
