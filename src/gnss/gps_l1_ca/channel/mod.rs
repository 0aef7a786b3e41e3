
use std::sync::{Arc, Mutex, MutexGuard};
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use log::info;
use tokio::sync::mpsc;

use crate::CorrelatorErr;
use crate::gnss::common::acquisition::AcquisitionResult;
use crate::gnss::gps_l1_ca::NUM_CODES;
use crate::gnss::gps_l1_ca::config::CorrelatorConfig;
use crate::gnss::gps_l1_ca::correlator::{Correlator, Measurement};
use crate::gnss::gps_l1_ca::replica::ReplicaTables;
use crate::gnss::gps_l1_ca::tracking::TrackingLoop;
use crate::io::PacketFifo;

pub mod worker;

pub use self::worker::{ChannelWorker, PriorityClass, WorkerHandle, WorkerStats};


/// Which channels are busy and with which PRN.  Shared between the channel threads and the
/// acquisition scheduler; every accessor takes the lock for exactly one operation.
#[derive(Debug)]
pub struct ActiveChannels {
	slots: Mutex<Vec<Option<usize>>>,
}

impl ActiveChannels {

	pub fn new(num_channels:usize) -> Self {
		Self{ slots: Mutex::new(vec![None; num_channels]) }
	}

	fn lock(&self) -> MutexGuard<Vec<Option<usize>>> {
		self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	pub fn len(&self) -> usize { self.lock().len() }

	pub fn activate(&self, chan:usize, prn:usize) -> Result<(), CorrelatorErr> {
		let mut slots = self.lock();
		let slot = slots.get_mut(chan).ok_or(CorrelatorErr::InvalidChannel(chan))?;
		*slot = Some(prn);
		Ok(())
	}

	pub fn deactivate(&self, chan:usize) {
		if let Some(slot) = self.lock().get_mut(chan) { *slot = None; }
	}

	pub fn is_active(&self, chan:usize) -> bool {
		self.lock().get(chan).map(|s| s.is_some()).unwrap_or(false)
	}

	pub fn find_free_channel(&self) -> Option<usize> {
		self.lock().iter().position(|s| s.is_none())
	}

	pub fn is_tracking(&self, prn:usize) -> bool {
		self.lock().iter().any(|s| *s == Some(prn))
	}

	/// PRN per channel, None where the channel is idle
	pub fn snapshot(&self) -> Vec<Option<usize>> { self.lock().clone() }

	/// Reserve a free channel for `prn` unless some channel already has it
	pub fn claim(&self, prn:usize) -> Result<usize, CorrelatorErr> {
		let mut slots = self.lock();
		if slots.iter().any(|s| *s == Some(prn)) { return Err(CorrelatorErr::AlreadyTracked(prn)); }
		let chan = slots.iter().position(|s| s.is_none()).ok_or(CorrelatorErr::NoFreeChannel)?;
		slots[chan] = Some(prn);
		Ok(chan)
	}

}

/// Where a channel sends its measurements
pub trait MeasurementSink {
	fn deliver(&mut self, meas:Measurement) -> Result<(), CorrelatorErr>;
}

impl MeasurementSink for mpsc::UnboundedSender<Measurement> {
	fn deliver(&mut self, meas:Measurement) -> Result<(), CorrelatorErr> {
		self.send(meas).map_err(|_| CorrelatorErr::QueueClosed)
	}
}

impl MeasurementSink for Vec<Measurement> {
	fn deliver(&mut self, meas:Measurement) -> Result<(), CorrelatorErr> {
		self.push(meas);
		Ok(())
	}
}

/// All correlator channels of the receiver, sharing one set of replica tables and one packet FIFO
pub struct ChannelBank {
	config: CorrelatorConfig,
	tables: Arc<ReplicaTables>,
	active: Arc<ActiveChannels>,
	fifo: Arc<PacketFifo>,
	run: Arc<AtomicBool>,
	acq_tx: Vec<mpsc::UnboundedSender<AcquisitionResult>>,
	workers: Vec<WorkerHandle>,
}

impl ChannelBank {

	/// Builds the replica tables; no channel runs until `start`
	pub fn new(config:&CorrelatorConfig, num_channels:usize, fifo:Arc<PacketFifo>, run:Arc<AtomicBool>) -> Result<Self, CorrelatorErr> {
		if num_channels == 0 { return Err(CorrelatorErr::InvalidConfig("at least one channel is required")); }
		let tables = Arc::new(ReplicaTables::generate(config)?);
		Ok(Self {
			config: config.clone(),
			tables,
			active: Arc::new(ActiveChannels::new(num_channels)),
			fifo,
			run,
			acq_tx: vec![],
			workers: vec![],
		})
	}

	pub fn tables(&self) -> &Arc<ReplicaTables> { &self.tables }
	pub fn active(&self) -> &Arc<ActiveChannels> { &self.active }
	pub fn fifo(&self) -> &Arc<PacketFifo> { &self.fifo }
	pub fn num_channels(&self) -> usize { self.active.len() }
	pub fn is_running(&self) -> bool { !self.workers.is_empty() }

	/// Spawn one worker per channel.  `make_loop` builds each channel's tracking loop and every
	/// channel reports into a clone of `sink`.
	pub fn start<T, F, M>(&mut self, priority:PriorityClass, mut make_loop:F, sink:M) -> Result<(), CorrelatorErr>
		where T:TrackingLoop + Send + 'static, F:FnMut(usize) -> T, M:MeasurementSink + Clone + Send + 'static {

		if self.is_running() { return Ok(()); }

		let poll = Duration::from_micros(self.config.poll_interval_us);
		for chan in 0..self.num_channels() {
			let (tx, rx) = mpsc::unbounded_channel();
			let correlator = Correlator::new(chan, &self.config, self.tables.clone(), self.active.clone())?;
			let worker = ChannelWorker::new(correlator, make_loop(chan), sink.clone(), self.fifo.clone(), rx,
				self.run.clone(), poll, self.config.samples_per_ms());
			self.workers.push(worker.start(priority)?);
			self.acq_tx.push(tx);
		}

		info!("Started {} correlator channels ({:?})", self.workers.len(), priority);
		Ok(())
	}

	/// Route an acquisition to a free channel.  Returns the channel it went to.
	pub fn dispatch(&self, result:AcquisitionResult) -> Result<usize, CorrelatorErr> {
		if result.prn == 0 || result.prn > NUM_CODES { return Err(CorrelatorErr::InvalidPrn(result.prn)); }
		if self.acq_tx.is_empty() { return Err(CorrelatorErr::QueueClosed); }

		let chan = self.active.claim(result.prn)?;
		let prn = result.prn;
		if self.acq_tx[chan].send(result).is_err() {
			self.active.deactivate(chan);
			return Err(CorrelatorErr::QueueClosed);
		}
		info!("Dispatched PRN {} to channel {}", prn, chan);
		Ok(chan)
	}

	/// Stop and join every worker
	pub fn stop(&mut self) -> Result<Vec<WorkerStats>, CorrelatorErr> {
		self.acq_tx.clear();
		let mut stats = vec![];
		let mut first_err = None;
		for handle in self.workers.drain(..) {
			match handle.stop() {
				Ok(s) => stats.push(s),
				Err(e) => { first_err.get_or_insert(e); },
			}
		}
		match first_err {
			Some(e) => Err(e),
			None => Ok(stats),
		}
	}

	/// Join every worker without asking it to stop; returns once the FIFO is closed and drained
	pub fn join(&mut self) -> Result<Vec<WorkerStats>, CorrelatorErr> {
		self.acq_tx.clear();
		let mut stats = vec![];
		for handle in self.workers.drain(..) {
			stats.push(handle.join()?);
		}
		Ok(stats)
	}

}

impl Drop for ChannelBank {
	fn drop(&mut self) {
		for handle in self.workers.drain(..) {
			let _ = handle.stop();
		}
	}
}
