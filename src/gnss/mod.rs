
/// Types shared with the acquisition side of the receiver
pub mod common;

/// GPS L1 C/A correlation, replica generation and channel management
pub mod gps_l1_ca;
