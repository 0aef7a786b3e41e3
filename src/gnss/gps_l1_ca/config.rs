
use std::path::Path;

use serde::{Serialize, Deserialize};

use crate::CorrelatorErr;

pub const DEFAULT_SAMPLE_FREQ_HZ:f64 = 2.048e6;
pub const DEFAULT_IF_FREQ_HZ:f64 = 604.0e3;
pub const DEFAULT_CARRIER_BINS:usize = 200;
pub const DEFAULT_CARRIER_SPACING_HZ:f64 = 50.0;
pub const DEFAULT_CODE_BINS:usize = 10;
pub const DEFAULT_TICKS_PER_SECOND:usize = 10;
pub const DEFAULT_ICP_TICKS:usize = 1;
pub const DEFAULT_POLL_INTERVAL_US:u64 = 100;

/// Everything the correlators need to know about the front end and the replica tables.
/// Loaded once, then cloned into each channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelatorConfig {
	pub sample_freq_hz: f64,
	pub if_freq_hz: f64,
	/// Doppler half-range D; the carrier table has 2*D+1 rows
	pub carrier_bins: usize,
	pub carrier_spacing_hz: f64,
	/// Code-delay bins per chip C; the code table has 2*C+1 rows per PRN
	pub code_bins: usize,
	/// Ring capacity of the measurement buffer
	pub ticks_per_second: usize,
	/// Span of the integrated carrier phase, in measurement ticks
	pub icp_ticks: usize,
	pub poll_interval_us: u64,
}

impl Default for CorrelatorConfig {
	fn default() -> Self {
		Self {
			sample_freq_hz:     DEFAULT_SAMPLE_FREQ_HZ,
			if_freq_hz:         DEFAULT_IF_FREQ_HZ,
			carrier_bins:       DEFAULT_CARRIER_BINS,
			carrier_spacing_hz: DEFAULT_CARRIER_SPACING_HZ,
			code_bins:          DEFAULT_CODE_BINS,
			ticks_per_second:   DEFAULT_TICKS_PER_SECOND,
			icp_ticks:          DEFAULT_ICP_TICKS,
			poll_interval_us:   DEFAULT_POLL_INTERVAL_US,
		}
	}
}

impl CorrelatorConfig {

	pub fn from_json_file<P: AsRef<Path>>(path:P) -> Result<Self, CorrelatorErr> {
		let text = std::fs::read_to_string(path)?;
		let config:Self = serde_json::from_str(&text).map_err(|_| CorrelatorErr::InvalidConfig("unable to parse JSON"))?;
		config.validate()?;
		Ok(config)
	}

	/// Samples in one nominal code epoch (1 ms); also the nominal packet length
	pub fn samples_per_ms(&self) -> usize { (self.sample_freq_hz / 1000.0).round() as usize }

	/// Length of every replica row
	pub fn replica_len(&self) -> usize { 2 * self.samples_per_ms() }

	pub fn validate(&self) -> Result<(), CorrelatorErr> {
		if !(self.sample_freq_hz > 0.0) { return Err(CorrelatorErr::InvalidConfig("sample_freq_hz must be positive")); }
		if self.samples_per_ms() == 0 { return Err(CorrelatorErr::InvalidConfig("sample_freq_hz is below 1 kHz")); }
		if !(self.carrier_spacing_hz > 0.0) { return Err(CorrelatorErr::InvalidConfig("carrier_spacing_hz must be positive")); }
		if self.code_bins == 0 || self.code_bins % 2 != 0 { return Err(CorrelatorErr::InvalidConfig("code_bins must be even and nonzero")); }
		if self.ticks_per_second == 0 { return Err(CorrelatorErr::InvalidConfig("ticks_per_second must be nonzero")); }
		if self.icp_ticks == 0 || 2*self.icp_ticks >= self.ticks_per_second {
			return Err(CorrelatorErr::InvalidConfig("icp_ticks must satisfy 0 < 2*icp_ticks < ticks_per_second"));
		}
		Ok(())
	}

}
