
use serde::{Serialize, Deserialize};

use crate::gnss::gps_l1_ca::correlator::Correlation;

pub mod costas;

/// Feedback from a tracking loop to its correlator, returned once per dump
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NcoCommand {
	/// New carrier NCO rate [Hz], intermediate frequency included
	pub carrier_nco: f64,
	/// New code NCO rate [chips/s]
	pub code_nco: f64,
	pub navigate: bool,
	/// Zero the 1 ms epoch counter
	pub reset_1ms: bool,
	/// Set the 20 ms epoch counter to 60
	pub reset_20ms: bool,
	pub set_z_count: bool,
	pub z_count: u32,
	/// Drop the channel
	pub kill: bool,
}

impl NcoCommand {

	/// Keep both NCOs where they are and change nothing else
	pub fn hold(carrier_nco:f64, code_nco:f64) -> Self {
		Self{ carrier_nco, code_nco, ..Default::default() }
	}

	pub fn kill() -> Self {
		Self{ kill: true, ..Default::default() }
	}

}

/// What a correlator talks to on every code epoch.  Implementations own all loop filtering,
/// lock detection and bit synchronization; the correlator only applies the returned command.
pub trait TrackingLoop {

	/// Called when the channel is (re)activated with the rates the correlator was seeded with
	fn start(&mut self, prn:usize, carrier_nco:f64, code_nco:f64, integration_ms:usize);

	/// Called once per dump with the derotated correlations
	fn accumulate(&mut self, corr:&Correlation) -> NcoCommand;

}
