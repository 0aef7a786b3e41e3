
pub mod channel;
pub mod config;
pub mod correlator;
pub mod replica;
pub mod signal_modulation;
pub mod tracking;

pub const CODE_CHIPS:usize = 1023;
pub const CODE_CHIPS_F64:f64 = 1023.0;
pub const CODE_RATE_CHIPS_PER_SEC:f64 = 1.023e6;
pub const L1_HZ:f64 = 1.57542e9;

/// PRNs 1 through 32 have C/A codes
pub const NUM_CODES:usize = 32;

pub const SECONDS_IN_WEEK:u32 = 604800;
