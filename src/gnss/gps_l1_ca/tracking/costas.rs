
use std::collections::VecDeque;
use std::f64::consts;

use log::{debug, info};
use num_complex::Complex;

use crate::gnss::gps_l1_ca::{CODE_RATE_CHIPS_PER_SEC, L1_HZ};
use crate::gnss::gps_l1_ca::correlator::Correlation;
use crate::gnss::gps_l1_ca::tracking::{NcoCommand, TrackingLoop};

pub const DEFAULT_PLL_BW_HZ:f64 = 25.0;
pub const DEFAULT_DLL_BW_HZ:f64 = 2.0;
pub const DEFAULT_CARRIER_LOCK_THRESHOLD:f64 = 0.85;
pub const DEFAULT_CN0_THRESHOLD_DB_HZ:f64 = 25.0;
pub const DEFAULT_LOCK_FAIL_LIMIT:usize = 50;

pub const PROMPT_BUFFER_LEN:usize = 20;
const ZETA:f64 = 0.7;
const EPOCH_SEC:f64 = 1.0e-3;

/// Proportional-integral loop filter in the bilinear form: y[n] = b1*x[n] + b0*x[n-1], added to
/// the NCO rate by the caller
#[derive(Debug, Clone)]
pub struct LoopFilter {
	b0: f64,
	b1: f64,
	x_prev: f64,
}

impl LoopFilter {

	/// Second-order loop with noise bandwidth `bw_hz`; `k` scales tau1 (1.0 for the DLL,
	/// 0.25 for the PLL)
	pub fn new(bw_hz:f64, k:f64, pdi:f64) -> Self {
		let wn = (bw_hz * 8.0 * ZETA) / (4.0 * ZETA * ZETA + 1.0);
		let tau1 = k / (wn * wn);
		let tau2 = (2.0 * ZETA) / wn;
		Self{ b0: (pdi - 2.0*tau2) / (2.0*tau1), b1: (pdi + 2.0*tau2) / (2.0*tau1), x_prev: 0.0 }
	}

	pub fn apply(&mut self, x:f64) -> f64 {
		let y = self.b1*x + self.b0*self.x_prev;
		self.x_prev = x;
		y
	}

	pub fn initialize(&mut self) { self.x_prev = 0.0; }

}

/// Narrow-band phase lock indicator over a run of prompts, cos(2*phase error); 0 with no power
pub fn carrier_lock_detector(prompts:&VecDeque<Complex<f64>>) -> f64 {
	let sum_i:f64 = prompts.iter().map(|c| c.re).sum();
	let sum_q:f64 = prompts.iter().map(|c| c.im).sum();
	let nbp = sum_i*sum_i + sum_q*sum_q;
	let nbd = sum_i*sum_i - sum_q*sum_q;
	if nbp > 0.0 { nbd / nbp } else { 0.0 }
}

/// Signal-to-noise-variance C/N0 estimate [dB-Hz]; infinite for a noise-free run, 0 with no signal
pub fn cn0_svn_estimator(prompts:&VecDeque<Complex<f64>>, coh_integration_time_s:f64) -> f64 {
	if prompts.is_empty() { return 0.0; }
	let n = prompts.len() as f64;
	let p_sig = (prompts.iter().map(|c| c.re.abs()).sum::<f64>() / n).powi(2);
	let p_tot = prompts.iter().map(|c| c.norm_sqr()).sum::<f64>() / n;
	if p_sig <= 0.0 { return 0.0; }
	if p_tot <= p_sig { return f64::INFINITY; }
	10.0 * (p_sig / (p_tot - p_sig)).log10() - 10.0 * coh_integration_time_s.log10()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostasState {
	Idle,
	PullIn,
	WaitingForBitEdge,
	Tracking,
	LostLock,
}

/// Reference second-order Costas PLL with a carrier-aided early-minus-late DLL
pub struct CostasLoop {
	pub if_freq_hz: f64,
	pub bw_pll_hz: f64,
	pub bw_dll_hz: f64,
	pub threshold_carrier_lock_test: f64,
	pub threshold_cn0_db_hz: f64,
	pub lock_fail_limit: usize,

	prn: usize,
	state: CostasState,
	integration_ms: usize,
	/// The first epoch after activation starts mid-code on clamped bins and is not used
	first_dump_pending: bool,

	carrier_nco: f64,
	code_nco_offset: f64,
	carrier_filter: LoopFilter,
	code_filter: LoopFilter,

	sum_early:  Complex<f64>,
	sum_prompt: Complex<f64>,
	sum_late:   Complex<f64>,
	summed_epochs: usize,

	prompt_buffer: VecDeque<Complex<f64>>,
	lock_fail_count: usize,
	last_cn0_db_hz: f64,
	last_carrier_lock_test: f64,
}

impl CostasLoop {

	pub fn new(if_freq_hz:f64) -> Self {
		Self {
			if_freq_hz,
			bw_pll_hz: DEFAULT_PLL_BW_HZ,
			bw_dll_hz: DEFAULT_DLL_BW_HZ,
			threshold_carrier_lock_test: DEFAULT_CARRIER_LOCK_THRESHOLD,
			threshold_cn0_db_hz: DEFAULT_CN0_THRESHOLD_DB_HZ,
			lock_fail_limit: DEFAULT_LOCK_FAIL_LIMIT,
			prn: 0,
			state: CostasState::Idle,
			integration_ms: 1,
			first_dump_pending: false,
			carrier_nco: if_freq_hz,
			code_nco_offset: 0.0,
			carrier_filter: LoopFilter::new(DEFAULT_PLL_BW_HZ, 0.25, EPOCH_SEC),
			code_filter: LoopFilter::new(DEFAULT_DLL_BW_HZ, 1.0, EPOCH_SEC),
			sum_early: Complex::new(0.0, 0.0),
			sum_prompt: Complex::new(0.0, 0.0),
			sum_late: Complex::new(0.0, 0.0),
			summed_epochs: 0,
			prompt_buffer: VecDeque::with_capacity(PROMPT_BUFFER_LEN + 1),
			lock_fail_count: 0,
			last_cn0_db_hz: 0.0,
			last_carrier_lock_test: 0.0,
		}
	}

	pub fn prn(&self) -> usize { self.prn }
	pub fn state(&self) -> CostasState { self.state }
	pub fn carrier_nco(&self) -> f64 { self.carrier_nco }
	pub fn code_nco(&self) -> f64 {
		CODE_RATE_CHIPS_PER_SEC * (1.0 + (self.carrier_nco - self.if_freq_hz) / L1_HZ) + self.code_nco_offset
	}
	pub fn last_cn0_db_hz(&self) -> f64 { self.last_cn0_db_hz }
	pub fn last_carrier_lock_test(&self) -> f64 { self.last_carrier_lock_test }

	fn lock_status(&mut self) -> bool {
		if self.prompt_buffer.len() < PROMPT_BUFFER_LEN { true } else {
			self.last_cn0_db_hz = cn0_svn_estimator(&self.prompt_buffer, EPOCH_SEC);
			self.last_carrier_lock_test = carrier_lock_detector(&self.prompt_buffer);
			(self.last_carrier_lock_test >= self.threshold_carrier_lock_test) && (self.last_cn0_db_hz >= self.threshold_cn0_db_hz)
		}
	}

	fn update_loops(&mut self) {
		let pdi = self.summed_epochs as f64 * EPOCH_SEC;

		// Costas discriminator [cycles], insensitive to data bit sign
		let carrier_error = if self.sum_prompt.re == 0.0 { 0.0 } else { (self.sum_prompt.im / self.sum_prompt.re).atan() / (2.0 * consts::PI) };
		self.carrier_nco += self.carrier_filter.apply(carrier_error);

		// Early leads prompt by half a chip, so E > L means the replica is behind [chips]
		let code_error = {
			let e = self.sum_early.norm();
			let l = self.sum_late.norm();
			if l+e == 0.0 { 0.0 } else { 0.5 * (e-l) / (e+l) }
		};
		self.code_nco_offset += self.code_filter.apply(code_error);

		debug!("PRN {}: pdi={:.3} [s], carrier_error={:.4} [cyc], code_error={:.4} [chips], carrier_nco={:.2} [Hz]",
			self.prn, pdi, carrier_error, code_error, self.carrier_nco);

		self.sum_early  = Complex::new(0.0, 0.0);
		self.sum_prompt = Complex::new(0.0, 0.0);
		self.sum_late   = Complex::new(0.0, 0.0);
		self.summed_epochs = 0;
	}

}

impl TrackingLoop for CostasLoop {

	fn start(&mut self, prn:usize, carrier_nco:f64, code_nco:f64, integration_ms:usize) {
		let integration_ms = integration_ms.max(1);
		let pdi = integration_ms as f64 * EPOCH_SEC;

		self.prn = prn;
		self.integration_ms = integration_ms;
		self.carrier_nco = carrier_nco;
		self.code_nco_offset = 0.0;
		self.code_nco_offset = code_nco - self.code_nco();

		self.carrier_filter = LoopFilter::new(self.bw_pll_hz, 0.25, pdi);
		self.code_filter = LoopFilter::new(self.bw_dll_hz, 1.0, pdi);

		self.sum_early  = Complex::new(0.0, 0.0);
		self.sum_prompt = Complex::new(0.0, 0.0);
		self.sum_late   = Complex::new(0.0, 0.0);
		self.summed_epochs = 0;

		self.prompt_buffer.clear();
		self.lock_fail_count = 0;
		self.last_cn0_db_hz = 0.0;
		self.last_carrier_lock_test = 0.0;
		self.first_dump_pending = true;
		self.state = CostasState::PullIn;
	}

	fn accumulate(&mut self, corr:&Correlation) -> NcoCommand {
		if self.state == CostasState::Idle || self.state == CostasState::LostLock {
			return NcoCommand::kill();
		}

		if self.first_dump_pending {
			self.first_dump_pending = false;
			return NcoCommand::hold(self.carrier_nco, self.code_nco());
		}

		let to_f64 = |c:Complex<i32>| Complex{ re: c.re as f64, im: c.im as f64 };
		let prompt = to_f64(corr.prompt);
		self.sum_early  += to_f64(corr.early);
		self.sum_prompt += prompt;
		self.sum_late   += to_f64(corr.late);
		self.summed_epochs += 1;

		let prev_prompt = self.prompt_buffer.back().cloned();
		self.prompt_buffer.push_back(prompt);
		while self.prompt_buffer.len() > PROMPT_BUFFER_LEN { self.prompt_buffer.pop_front(); }

		if self.summed_epochs >= self.integration_ms { self.update_loops(); }

		if !self.lock_status() { self.lock_fail_count += 1; }
		else if self.lock_fail_count > 0 { self.lock_fail_count -= 1; }

		if self.lock_fail_count > self.lock_fail_limit {
			info!("PRN {}: lost lock (carrier lock test {:.3}, C/N0 {:.1} [dB-Hz])", self.prn, self.last_carrier_lock_test, self.last_cn0_db_hz);
			self.state = CostasState::LostLock;
			return NcoCommand::kill();
		}

		let mut cmd = NcoCommand::hold(self.carrier_nco, self.code_nco());
		match self.state {
			CostasState::PullIn => {
				if self.prompt_buffer.len() >= PROMPT_BUFFER_LEN && self.lock_fail_count == 0 {
					debug!("PRN {}: carrier lock, C/N0 {:.1} [dB-Hz]", self.prn, self.last_cn0_db_hz);
					self.state = CostasState::WaitingForBitEdge;
				}
			},
			CostasState::WaitingForBitEdge => {
				if let Some(prev) = prev_prompt {
					if (prev.re > 0.0) != (prompt.re > 0.0) {
						debug!("PRN {}: found bit edge", self.prn);
						cmd.reset_1ms = true;
						cmd.navigate = true;
						self.state = CostasState::Tracking;
					}
				}
			},
			CostasState::Tracking => { cmd.navigate = self.lock_fail_count == 0; },
			CostasState::Idle | CostasState::LostLock => {},
		}
		cmd
	}

}
