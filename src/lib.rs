
use thiserror::Error;

pub mod gnss;
pub mod io;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum CorrelatorErr {
	#[error("invalid configuration: {0}")]
	InvalidConfig(&'static str),
	#[error("PRN {0} has no C/A code")]
	InvalidPrn(usize),
	#[error("channel {0} does not exist")]
	InvalidChannel(usize),
	#[error("no free channel available")]
	NoFreeChannel,
	#[error("PRN {0} is already being tracked")]
	AlreadyTracked(usize),
	#[error("short read: expected {expected} samples, got {got}")]
	ShortRead { expected: usize, got: usize },
	#[error("queue closed")]
	QueueClosed,
	#[error("unable to spawn worker thread: {0}")]
	Spawn(String),
	#[error("worker thread panicked")]
	WorkerPanicked,
	#[error("I/O error: {0}")]
	Io(String),
}

impl From<std::io::Error> for CorrelatorErr {
	fn from(err: std::io::Error) -> Self { CorrelatorErr::Io(err.to_string()) }
}
