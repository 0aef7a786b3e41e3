
use std::f64::consts;

use num_complex::Complex;

use crate::CorrelatorErr;
use crate::gnss::gps_l1_ca::{CODE_CHIPS, CODE_RATE_CHIPS_PER_SEC, L1_HZ, NUM_CODES};

// G2 output taps for PRN 1-32, IS-GPS-200 Table 3-Ia (1-based register stages)
const G2_TAPS:[(usize, usize); NUM_CODES] = [
	(2, 6), (3, 7), (4, 8), (5, 9), (1, 9), (2, 10), (1, 8), (2, 9),
	(3, 10), (2, 3), (3, 4), (5, 6), (6, 7), (7, 8), (8, 9), (9, 10),
	(1, 4), (2, 5), (3, 6), (4, 7), (5, 8), (6, 9), (1, 3), (4, 6),
	(5, 7), (6, 8), (7, 9), (8, 10), (1, 6), (2, 7), (3, 8), (4, 9)];

/// The C/A code for one PRN as 0/1 bits
pub fn prn_bits(prn:usize) -> Result<Vec<u8>, CorrelatorErr> {
	if prn == 0 || prn > NUM_CODES { return Err(CorrelatorErr::InvalidPrn(prn)); }
	let (tap_a, tap_b) = G2_TAPS[prn-1];

	let mut g1 = [1u8; 10];
	let mut g2 = [1u8; 10];

	Ok((0..CODE_CHIPS).map(|_| {
		let chip = g1[9] ^ g2[tap_a-1] ^ g2[tap_b-1];

		let g1_fb = g1[2] ^ g1[9];
		let g2_fb = g2[1] ^ g2[2] ^ g2[5] ^ g2[7] ^ g2[8] ^ g2[9];
		g1.rotate_right(1);
		g2.rotate_right(1);
		g1[0] = g1_fb;
		g2[0] = g2_fb;

		chip
	}).collect())
}

/// The C/A code for one PRN as +1/-1 chips; logic 0 maps to +1
pub fn prn_int(prn:usize) -> Result<Vec<i8>, CorrelatorErr> {
	Ok(prn_bits(prn)?.into_iter().map(|b| if b == 0 { 1 } else { -1 }).collect())
}

/// Noise-free IF signal for one satellite, sampled the way the front end would deliver it.
/// Phases are evaluated from the absolute sample index so long runs do not drift.
#[derive(Debug, Clone)]
pub struct IfSignal {
	code: Vec<i8>,
	pub fs: f64,
	pub carrier_hz: f64,
	pub code_rate: f64,
	pub code_phase_chips: f64,
	pub carrier_phase_rad: f64,
	pub amplitude: f64,
	sample_idx: u64,
}

impl IfSignal {

	pub fn new(prn:usize, fs:f64, if_hz:f64, doppler_hz:f64, code_phase_chips:f64, amplitude:f64) -> Result<Self, CorrelatorErr> {
		let code = prn_int(prn)?;
		let code_rate = CODE_RATE_CHIPS_PER_SEC * (1.0 + doppler_hz / L1_HZ);
		Ok(Self { code, fs, carrier_hz: if_hz + doppler_hz, code_rate, code_phase_chips,
			carrier_phase_rad: 0.0, amplitude, sample_idx: 0 })
	}

	pub fn sample(&self, idx:u64) -> Complex<f64> {
		let t = idx as f64 / self.fs;
		let chip_idx = (self.code_phase_chips + t * self.code_rate).floor().rem_euclid(CODE_CHIPS as f64) as usize;
		let chip = self.code[chip_idx % CODE_CHIPS] as f64;
		let phase = self.carrier_phase_rad + 2.0 * consts::PI * self.carrier_hz * t;
		Complex{ re: phase.cos(), im: phase.sin() } * (chip * self.amplitude)
	}

	pub fn sample_idx(&self) -> u64 { self.sample_idx }

	pub fn skip(&mut self, n:usize) { self.sample_idx += n as u64; }

	/// Next `n` samples, quantized to the front end's 16-bit IQ
	pub fn next_samples(&mut self, n:usize) -> Vec<Complex<i16>> {
		let start = self.sample_idx;
		self.sample_idx += n as u64;
		(start..start + n as u64).map(|idx| {
			let s = self.sample(idx);
			Complex{ re: s.re.round() as i16, im: s.im.round() as i16 }
		}).collect()
	}

}

#[cfg(test)]
mod tests {
	use super::*;

	fn first_ten_octal(prn:usize) -> u32 {
		prn_bits(prn).unwrap().iter().take(10).fold(0u32, |acc, b| (acc << 1) | (*b as u32))
	}

	#[test]
	fn first_chips_match_icd() {
		// IS-GPS-200 Table 3-Ia, first 10 chips in octal
		assert_eq!(first_ten_octal(1),  0o1440);
		assert_eq!(first_ten_octal(2),  0o1620);
		assert_eq!(first_ten_octal(3),  0o1710);
		assert_eq!(first_ten_octal(10), 0o1504);
		assert_eq!(first_ten_octal(32), 0o1712);
	}

	#[test]
	fn autocorrelation_sidelobes_are_three_valued() {
		let code = prn_int(1).unwrap();
		let corr = |lag:usize| -> i32 { (0..CODE_CHIPS).map(|i| (code[i] * code[(i+lag)%CODE_CHIPS]) as i32).sum() };
		assert_eq!(corr(0), 1023);
		for lag in 1..CODE_CHIPS {
			let c = corr(lag);
			assert!(c == -1 || c == 63 || c == -65, "lag {} gave {}", lag, c);
		}
	}

	#[test]
	fn invalid_prn_is_rejected() {
		assert_eq!(prn_int(0), Err(CorrelatorErr::InvalidPrn(0)));
		assert_eq!(prn_int(33), Err(CorrelatorErr::InvalidPrn(33)));
	}

	#[test]
	fn signal_follows_code_phase() {
		let mut sig = IfSignal::new(5, 2.048e6, 0.0, 0.0, 0.0, 100.0).unwrap();
		let code = prn_int(5).unwrap();
		let samples = sig.next_samples(8);
		// Just under two samples per chip, no carrier
		let chips = [0, 0, 0, 1, 1, 2, 2, 3];
		for (s, c) in samples.iter().zip(chips.iter()) {
			assert_eq!(s.re, 100 * code[*c] as i16);
			assert_eq!(s.im, 0);
		}
	}
}
