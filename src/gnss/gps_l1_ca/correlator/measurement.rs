
use serde::{Serialize, Deserialize};

use crate::gnss::gps_l1_ca::correlator::state::CorrelatorState;

/// Raw observables for one channel at one measurement tick, as handed to the navigation solver
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
	pub chan: usize,
	pub prn: usize,
	pub code_phase: f64,
	pub code_phase_mod: f64,
	pub carrier_phase: f64,
	pub carrier_phase_mod: f64,
	pub carrier_phase_prev: f64,
	pub code_nco: f64,
	pub carrier_nco: f64,
	pub ms1: u32,
	pub ms20: u32,
	pub z_count: u32,
	/// Sequence number of the packet the snapshot was taken on
	pub count: u64,
	pub navigate: bool,
}

impl Measurement {

	pub fn snapshot(chan:usize, state:&CorrelatorState, count:u64) -> Self {
		Self {
			chan,
			prn: state.prn,
			code_phase: state.code_phase,
			code_phase_mod: state.code_phase_mod,
			carrier_phase: state.carrier_phase,
			carrier_phase_mod: state.carrier_phase_mod,
			carrier_phase_prev: state.carrier_phase_prev,
			code_nco: state.code_nco,
			carrier_nco: state.carrier_nco,
			ms1: state.epochs.ms1,
			ms20: state.epochs.ms20,
			z_count: state.epochs.z_count,
			count,
			navigate: state.navigate,
		}
	}

	/// Carrier cycles integrated between `carrier_phase_prev` and `carrier_phase`
	pub fn integrated_carrier_phase(&self) -> f64 { self.carrier_phase - self.carrier_phase_prev }

}

/// Fixed-capacity history of snapshots indexed by measurement tick modulo capacity
#[derive(Debug, Clone)]
pub struct MeasurementRing {
	slots: Box<[Measurement]>,
}

impl MeasurementRing {

	pub fn new(capacity:usize) -> Self {
		Self{ slots: vec![Measurement::default(); capacity.max(1)].into_boxed_slice() }
	}

	pub fn capacity(&self) -> usize { self.slots.len() }

	fn index(&self, tick:i64) -> usize { tick.rem_euclid(self.slots.len() as i64) as usize }

	pub fn get(&self, tick:i64) -> &Measurement { &self.slots[self.index(tick)] }

	pub fn store(&mut self, tick:i64, meas:Measurement) {
		let idx = self.index(tick);
		self.slots[idx] = meas;
	}

	pub fn clear(&mut self) {
		for slot in self.slots.iter_mut() { *slot = Measurement::default(); }
	}

	/// Build the measurement for `tick` from the snapshot at t-icp, with carrier phase integrated
	/// from t-2*icp up to `carrier_phase_now`, then record `current` in its slot.  Navigable only
	/// if the snapshots at t-2*icp, t-icp and t all were.
	pub fn advance(&mut self, tick:i64, icp:i64, current:Measurement, carrier_phase_now:f64) -> Measurement {
		let mut meas = self.get(tick - icp).clone();
		meas.carrier_phase_prev = self.get(tick - 2*icp).carrier_phase;
		meas.carrier_phase = carrier_phase_now;

		self.store(tick, current);

		meas.navigate = self.get(tick - 2*icp).navigate && self.get(tick - icp).navigate && self.get(tick).navigate;
		meas
	}

}

#[cfg(test)]
mod tests {
	use super::*;

	fn snap(navigate:bool, carrier_phase:f64) -> Measurement {
		Measurement{ navigate, carrier_phase, prn: 4, ..Default::default() }
	}

	#[test]
	fn negative_ticks_wrap() {
		let mut ring = MeasurementRing::new(10);
		ring.store(-1, snap(true, 9.0));
		assert_eq!(ring.get(9).carrier_phase, 9.0);
		assert_eq!(ring.get(19).carrier_phase, 9.0);
	}

	#[test]
	fn navigability_needs_all_three_snapshots() {
		for mask in 0..8u8 {
			let mut ring = MeasurementRing::new(10);
			ring.store(3, snap(mask & 1 != 0, 0.0));
			ring.store(4, snap(mask & 2 != 0, 0.0));
			let meas = ring.advance(5, 1, snap(mask & 4 != 0, 0.0), 0.0);
			assert_eq!(meas.navigate, mask == 7, "mask {:03b}", mask);
		}
	}

	#[test]
	fn integrated_phase_spans_two_icp_ticks() {
		let mut ring = MeasurementRing::new(10);
		ring.store(1, snap(true, 100.0));
		ring.store(3, Measurement{ code_phase: 42.0, ..snap(true, 300.0) });
		let meas = ring.advance(5, 2, snap(true, 500.0), 512.5);
		assert_eq!(meas.code_phase, 42.0);
		assert_eq!(meas.carrier_phase_prev, 100.0);
		assert_eq!(meas.carrier_phase, 512.5);
		assert_eq!(meas.integrated_carrier_phase(), 412.5);
		assert_eq!(ring.get(5).carrier_phase, 500.0);
	}

	#[test]
	fn clear_resets_every_slot() {
		let mut ring = MeasurementRing::new(4);
		for t in 0..4 { ring.store(t, snap(true, t as f64)); }
		ring.clear();
		for t in 0..4 { assert_eq!(ring.get(t), &Measurement::default()); }
	}
}
