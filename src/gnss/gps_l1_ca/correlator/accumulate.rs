
use num_complex::Complex;
use num_traits::Zero;
use serde::{Serialize, Deserialize};

use crate::gnss::gps_l1_ca::correlator::state::Bins;
use crate::gnss::gps_l1_ca::replica::{ReplicaTables, CARRIER_SCALE_BITS};

/// Early, prompt and late correlator outputs for one code epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correlation {
	pub early:  Complex<i32>,
	pub prompt: Complex<i32>,
	pub late:   Complex<i32>,
}

impl Default for Correlation {
	fn default() -> Self { Self{ early: Complex::zero(), prompt: Complex::zero(), late: Complex::zero() } }
}

impl Correlation {

	pub fn taps(&self) -> [Complex<i32>; 3] { [self.early, self.prompt, self.late] }

	pub fn is_zero(&self) -> bool { self.early.is_zero() && self.prompt.is_zero() && self.late.is_zero() }

	/// Rotate all three taps by `ang` radians, flooring back to integers
	pub fn derotate(&mut self, ang:f64) {
		let (s, c) = ang.sin_cos();
		let rot = |x:Complex<i32>| -> Complex<i32> {
			let (re, im) = (x.re as f64, x.im as f64);
			Complex{ re: (c*re - s*im).floor() as i32, im: (s*re + c*im).floor() as i32 }
		};
		self.early  = rot(self.early);
		self.prompt = rot(self.prompt);
		self.late   = rot(self.late);
	}

}

/// Carrier wipeoff followed by the three-tap code accumulation.  Holds the running sums between
/// dumps and a scratch buffer so nothing is allocated per packet.
#[derive(Debug)]
pub struct CorrelationEngine {
	scratch: Vec<Complex<i32>>,
	sums: Correlation,
}

impl CorrelationEngine {

	pub fn new(max_len:usize) -> Self {
		Self{ scratch: Vec::with_capacity(max_len), sums: Correlation::default() }
	}

	pub fn sums(&self) -> &Correlation { &self.sums }

	pub fn clear(&mut self) { self.sums = Correlation::default(); }

	/// Take the current sums and start over from zero
	pub fn take(&mut self) -> Correlation { std::mem::take(&mut self.sums) }

	/// Correlate `samples` against the rows selected by `bins`, starting `offset` samples into
	/// each row.  Anything past the end of a row is ignored.
	pub fn accumulate(&mut self, tables:&ReplicaTables, prn:usize, bins:&Bins, offset:usize, samples:&[Complex<i16>]) {
		let carrier = match tables.carrier_row(bins.carrier) {
			Some(row) => row.get(offset..).unwrap_or(&[]),
			None => return,
		};

		self.scratch.clear();
		self.scratch.extend(samples.iter().zip(carrier.iter()).map(|(x, w)| {
			let (xr, xi) = (x.re as i32, x.im as i32);
			let (wr, wi) = (w.re as i32, w.im as i32);
			Complex{ re: (xr*wr + xi*wi) >> CARRIER_SCALE_BITS, im: (xi*wr - xr*wi) >> CARRIER_SCALE_BITS }
		}));

		let mut taps = [Complex::<i32>::zero(); 3];
		for (tap, bin) in taps.iter_mut().zip(bins.code.iter()) {
			let code = match tables.code_row(prn, *bin) {
				Some(row) => row.get(offset..).unwrap_or(&[]),
				None => continue,
			};
			for (s, m) in self.scratch.iter().zip(code.iter()) {
				let m = *m as i32;
				tap.re += (s.re ^ m) - m;
				tap.im += (s.im ^ m) - m;
			}
		}

		self.sums.early  += taps[0];
		self.sums.prompt += taps[1];
		self.sums.late   += taps[2];
	}

}
