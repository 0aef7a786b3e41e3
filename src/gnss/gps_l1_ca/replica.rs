
use std::f64::consts;

use log::info;
use num_complex::Complex;

use crate::CorrelatorErr;
use crate::gnss::gps_l1_ca::{signal_modulation, CODE_CHIPS, CODE_RATE_CHIPS_PER_SEC, NUM_CODES};
use crate::gnss::gps_l1_ca::config::CorrelatorConfig;

/// Carrier replicas are stored as unit phasors scaled by 2^CARRIER_SCALE_BITS
pub const CARRIER_SCALE_BITS:u32 = 14;

/// Code replicas hold sign masks: KEEP leaves a sample alone, NEGATE flips it
pub const CHIP_KEEP:i16 = 0;
pub const CHIP_NEGATE:i16 = -1;

/// Pre-sampled carrier wipeoff and code replicas for every Doppler and code-delay bin.  Built
/// once from the configuration and shared read-only between all channels.
#[derive(Debug)]
pub struct ReplicaTables {
	carrier_bins: usize,
	code_bins: usize,
	row_len: usize,
	carrier: Vec<Complex<i16>>,
	code: Vec<i16>,
}

impl ReplicaTables {

	pub fn generate(config:&CorrelatorConfig) -> Result<Self, CorrelatorErr> {
		config.validate()?;

		let fs = config.sample_freq_hz;
		let row_len = config.replica_len();
		let d = config.carrier_bins as i64;
		let c = config.code_bins;
		let scale = (1i32 << CARRIER_SCALE_BITS) as f64;

		let mut carrier:Vec<Complex<i16>> = Vec::with_capacity((2*config.carrier_bins + 1) * row_len);
		for bin in -d..=d {
			let freq_hz = config.if_freq_hz + (bin as f64) * config.carrier_spacing_hz;
			let dphase = 2.0 * consts::PI * freq_hz / fs;
			carrier.extend((0..row_len).map(|n| {
				let phase = dphase * (n as f64);
				Complex{ re: (phase.cos() * scale).round() as i16, im: (phase.sin() * scale).round() as i16 }
			}));
		}

		let chip_step = CODE_RATE_CHIPS_PER_SEC / fs;
		let mut code:Vec<i16> = Vec::with_capacity(NUM_CODES * (2*c + 1) * row_len);
		for prn in 1..=NUM_CODES {
			let chips = signal_modulation::prn_int(prn)?;
			for bin in 0..=2*c {
				let start = -0.5 + (bin as f64) / (c as f64);
				code.extend((0..row_len).map(|n| {
					let phase = start + chip_step * (n as f64);
					let idx = ((phase + CODE_CHIPS as f64).floor() as usize) % CODE_CHIPS;
					if chips[idx] > 0 { CHIP_KEEP } else { CHIP_NEGATE }
				}));
			}
		}

		info!("Generated replica tables: {} carrier rows, {} code rows of {} samples",
			2*config.carrier_bins + 1, NUM_CODES * (2*c + 1), row_len);

		Ok(Self { carrier_bins: config.carrier_bins, code_bins: c, row_len, carrier, code })
	}

	pub fn carrier_bins(&self) -> usize { self.carrier_bins }
	pub fn code_bins(&self) -> usize { self.code_bins }
	pub fn row_len(&self) -> usize { self.row_len }

	/// Highest valid carrier bin index, 2*D
	pub fn max_carrier_bin(&self) -> usize { 2 * self.carrier_bins }

	/// Highest valid code bin index, 2*C
	pub fn max_code_bin(&self) -> usize { 2 * self.code_bins }

	pub fn carrier_row(&self, bin:usize) -> Option<&[Complex<i16>]> {
		if bin > self.max_carrier_bin() { return None; }
		let start = bin * self.row_len;
		self.carrier.get(start..start + self.row_len)
	}

	pub fn code_row(&self, prn:usize, bin:usize) -> Option<&[i16]> {
		if prn == 0 || prn > NUM_CODES || bin > self.max_code_bin() { return None; }
		let start = ((prn - 1) * (2*self.code_bins + 1) + bin) * self.row_len;
		self.code.get(start..start + self.row_len)
	}

}

#[cfg(test)]
mod tests {
	use super::*;

	fn small_config() -> CorrelatorConfig {
		CorrelatorConfig{ carrier_bins: 4, carrier_spacing_hz: 500.0, code_bins: 4, ..Default::default() }
	}

	#[test]
	fn table_dimensions() {
		let config = small_config();
		let tables = ReplicaTables::generate(&config).unwrap();
		assert_eq!(tables.row_len(), 4096);
		assert!(tables.carrier_row(8).is_some());
		assert!(tables.carrier_row(9).is_none());
		assert!(tables.code_row(32, 8).is_some());
		assert!(tables.code_row(33, 0).is_none());
		assert!(tables.code_row(0, 0).is_none());
		assert!(tables.code_row(1, 9).is_none());
	}

	#[test]
	fn generation_is_bit_reproducible() {
		let config = small_config();
		let a = ReplicaTables::generate(&config).unwrap();
		let b = ReplicaTables::generate(&config).unwrap();
		for bin in 0..=a.max_carrier_bin() {
			assert_eq!(a.carrier_row(bin), b.carrier_row(bin));
		}
		for prn in 1..=NUM_CODES {
			for bin in 0..=a.max_code_bin() {
				assert_eq!(a.code_row(prn, bin), b.code_row(prn, bin));
			}
		}
	}

	#[test]
	fn carrier_rows_are_unit_phasors() {
		let tables = ReplicaTables::generate(&small_config()).unwrap();
		let scale = (1i32 << CARRIER_SCALE_BITS) as f64;
		for c in tables.carrier_row(0).unwrap() {
			let mag = ((c.re as f64).powi(2) + (c.im as f64).powi(2)).sqrt() / scale;
			assert!((mag - 1.0).abs() < 1.0e-3);
		}
		assert_eq!(tables.carrier_row(4).unwrap()[0], Complex{ re: 16384, im: 0 });
	}

	#[test]
	fn center_carrier_row_is_at_if() {
		let config = small_config();
		let tables = ReplicaTables::generate(&config).unwrap();
		// 604 kHz at 2.048 MHz sampling repeats every 512 samples
		let row = tables.carrier_row(config.carrier_bins).unwrap();
		assert_eq!(row[0], row[512]);
		assert_eq!(row[100], row[100 + 1024]);
	}

	#[test]
	fn prompt_code_row_matches_chip_sequence() {
		let config = small_config();
		let tables = ReplicaTables::generate(&config).unwrap();
		let chips = signal_modulation::prn_int(3).unwrap();
		// Bin C/2 starts exactly at chip phase zero
		let row = tables.code_row(3, config.code_bins / 2).unwrap();
		let step = CODE_RATE_CHIPS_PER_SEC / config.sample_freq_hz;
		for (n, mask) in row.iter().enumerate().take(2048) {
			let chip = chips[((n as f64) * step).floor() as usize % CODE_CHIPS];
			assert_eq!(*mask, if chip > 0 { CHIP_KEEP } else { CHIP_NEGATE });
		}
	}
}
