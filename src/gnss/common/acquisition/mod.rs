
use serde::{Serialize, Deserialize};

/// Confidence of an acquisition; selects how long the tracking loop integrates at first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquisitionClass {
	Strong,
	Medium,
	Weak,
}

impl AcquisitionClass {

	/// Initial pre-detection integration length [ms] handed to the tracking loop
	pub fn integration_ms(&self) -> usize {
		match self {
			AcquisitionClass::Strong => 1,
			AcquisitionClass::Medium => 4,
			AcquisitionClass::Weak   => 4,
		}
	}

}

impl Default for AcquisitionClass {
	fn default() -> Self { AcquisitionClass::Strong }
}

/// What the acquisition engine found, and when.  `count` is the sequence number of the packet
/// whose first sample `delay_chips` refers to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionResult {
	pub prn: usize,
	pub doppler_hz: f64,
	pub delay_chips: f64,
	pub class: AcquisitionClass,
	pub count: u64,
}

#[test]
fn integration_length_follows_class() {
	assert_eq!(AcquisitionClass::Strong.integration_ms(), 1);
	assert_eq!(AcquisitionClass::Medium.integration_ms(), 4);
	assert_eq!(AcquisitionClass::Weak.integration_ms(), 4);
}

#[test]
fn acquisition_result_from_json() {
	let json = r#"{"prn": 7, "doppler_hz": -1250.0, "delay_chips": 511.5, "class": "Medium", "count": 42}"#;
	let r:AcquisitionResult = serde_json::from_str(json).unwrap();
	assert_eq!(r.prn, 7);
	assert_eq!(r.class, AcquisitionClass::Medium);
	assert_eq!(r.count, 42);
}
