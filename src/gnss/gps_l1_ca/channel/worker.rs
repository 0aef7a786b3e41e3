
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Serialize, Deserialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::CorrelatorErr;
use crate::gnss::common::acquisition::AcquisitionResult;
use crate::gnss::gps_l1_ca::channel::MeasurementSink;
use crate::gnss::gps_l1_ca::correlator::Correlator;
use crate::gnss::gps_l1_ca::tracking::TrackingLoop;
use crate::io::{FifoPoll, FifoRead, PacketFifo};

/// Scheduling class for a channel thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityClass {
	Normal,
	/// SCHED_FIFO at the given priority, 1 through 99
	RealTime(i32),
}

impl Default for PriorityClass {
	fn default() -> Self { PriorityClass::Normal }
}

impl PriorityClass {

	/// Apply to the calling thread.  Missing privileges are not fatal; the thread keeps running
	/// at normal priority.
	fn apply(self) {
		if let PriorityClass::RealTime(prio) = self {
			if let Err(e) = set_fifo_priority(prio.max(1).min(99)) {
				warn!("Unable to set real-time priority {}: {}", prio, e);
			}
		}
	}

}

#[cfg(target_os = "linux")]
fn set_fifo_priority(prio:i32) -> Result<(), std::io::Error> {
	unsafe {
		let mut param:libc::sched_param = std::mem::zeroed();
		param.sched_priority = prio;
		if libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) != 0 {
			return Err(std::io::Error::last_os_error());
		}
	}
	Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_fifo_priority(_prio:i32) -> Result<(), std::io::Error> {
	Err(std::io::Error::new(std::io::ErrorKind::Other, "SCHED_FIFO is only available on Linux"))
}

/// Counters a worker reports when it exits
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerStats {
	pub chan: usize,
	pub packets: u64,
	pub skipped_packets: u64,
	pub short_packets: u64,
	pub activations: u64,
	pub saturations: u64,
}

/// Everything one channel thread owns
pub struct ChannelWorker<T, M> {
	correlator: Correlator,
	trk: T,
	sink: M,
	fifo: Arc<PacketFifo>,
	acq_rx: mpsc::UnboundedReceiver<AcquisitionResult>,
	run: Arc<AtomicBool>,
	poll: Duration,
	samples_per_packet: usize,
}

impl<T, M> ChannelWorker<T, M> where T:TrackingLoop + Send + 'static, M:MeasurementSink + Send + 'static {

	pub fn new(correlator:Correlator, trk:T, sink:M, fifo:Arc<PacketFifo>, acq_rx:mpsc::UnboundedReceiver<AcquisitionResult>,
		run:Arc<AtomicBool>, poll:Duration, samples_per_packet:usize) -> Self {
		Self{ correlator, trk, sink, fifo, acq_rx, run, poll, samples_per_packet }
	}

	/// Spawn the channel thread, named `correlator-<chan>`
	pub fn start(self, priority:PriorityClass) -> Result<WorkerHandle, CorrelatorErr> {
		let chan = self.correlator.chan();
		let stop = Arc::new(AtomicBool::new(false));
		let stop_thread = stop.clone();

		let handle = thread::Builder::new()
			.name(format!("correlator-{}", chan))
			.spawn(move || {
				priority.apply();
				self.run(&stop_thread)
			})
			.map_err(|e| CorrelatorErr::Spawn(e.to_string()))?;

		Ok(WorkerHandle{ chan, stop, handle })
	}

	fn keep_running(&self, stop:&AtomicBool) -> bool {
		self.run.load(Ordering::SeqCst) && !stop.load(Ordering::SeqCst)
	}

	fn run(mut self, stop:&AtomicBool) -> WorkerStats {
		let chan = self.correlator.chan();
		let mut stats = WorkerStats{ chan, ..Default::default() };
		let mut last:Option<u64> = None;
		info!("Channel {} worker started", chan);

		while self.keep_running(stop) {
			let read = match self.fifo.poll(last) {
				FifoPoll::Ready(read) => read,
				FifoPoll::Pending => {
					thread::sleep(self.poll);
					continue;
				},
				FifoPoll::Closed => break,
			};
			last = Some(read.packet.count);

			if let Err(e) = self.step(&read, &mut stats) {
				warn!("Channel {}: stopping, {}", chan, e);
				break;
			}
		}

		self.release();
		info!("Channel {} worker stopped after {} packets", chan, stats.packets);
		stats
	}

	fn step(&mut self, read:&FifoRead, stats:&mut WorkerStats) -> Result<(), CorrelatorErr> {
		let chan = self.correlator.chan();
		if read.skipped > 0 {
			warn!("Channel {}: {} packets overwritten before they were read, resuming at {}", chan, read.skipped, read.packet.count);
			stats.skipped_packets += read.skipped;
		}

		if read.packet.samples.len() < self.samples_per_packet {
			debug!("Channel {}: skipping packet {} with {} samples", chan, read.packet.count, read.packet.samples.len());
			stats.short_packets += 1;
			return Ok(());
		}

		if !self.correlator.is_active() {
			match self.acq_rx.try_recv() {
				Ok(result) => match self.correlator.activate(&result, read.packet.count, &mut self.trk) {
					Ok(()) => stats.activations += 1,
					Err(e) => {
						warn!("Channel {}: unable to activate PRN {}: {}", chan, result.prn, e);
						self.correlator.release();
					},
				},
				Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {},
			}
		}

		let saturations_before = self.correlator.saturation_count();
		self.correlator.process_packet(&read.packet, &mut self.trk, &mut self.sink)?;
		stats.saturations += self.correlator.saturation_count().saturating_sub(saturations_before);
		stats.packets += 1;
		Ok(())
	}

	/// Refuse further acquisitions, drop any still queued and free the channel's slot
	fn release(&mut self) {
		let chan = self.correlator.chan();
		self.acq_rx.close();
		while let Ok(result) = self.acq_rx.try_recv() {
			debug!("Channel {}: dropping queued PRN {}", chan, result.prn);
		}
		self.correlator.release();
	}

}

/// Owner's end of a running channel thread
pub struct WorkerHandle {
	chan: usize,
	stop: Arc<AtomicBool>,
	handle: JoinHandle<WorkerStats>,
}

impl WorkerHandle {

	pub fn chan(&self) -> usize { self.chan }

	pub fn is_finished(&self) -> bool { self.handle.is_finished() }

	/// Ask the thread to stop after its current packet and wait for it
	pub fn stop(self) -> Result<WorkerStats, CorrelatorErr> {
		self.stop.store(true, Ordering::SeqCst);
		self.join()
	}

	/// Wait for the thread to finish on its own
	pub fn join(self) -> Result<WorkerStats, CorrelatorErr> {
		self.handle.join().map_err(|_| CorrelatorErr::WorkerPanicked)
	}

}

#[cfg(test)]
mod tests {
	use super::*;
	use num_complex::Complex;

	use crate::gnss::common::acquisition::AcquisitionClass;
	use crate::gnss::gps_l1_ca::channel::ActiveChannels;
	use crate::gnss::gps_l1_ca::config::CorrelatorConfig;
	use crate::gnss::gps_l1_ca::correlator::{Correlation, Measurement};
	use crate::gnss::gps_l1_ca::replica::ReplicaTables;
	use crate::gnss::gps_l1_ca::tracking::NcoCommand;
	use crate::io::Packet;

	#[derive(Default)]
	struct Hold { carrier_nco: f64, code_nco: f64 }

	impl TrackingLoop for Hold {
		fn start(&mut self, _prn:usize, carrier_nco:f64, code_nco:f64, _integration_ms:usize) {
			self.carrier_nco = carrier_nco;
			self.code_nco = code_nco;
		}
		fn accumulate(&mut self, _corr:&Correlation) -> NcoCommand { NcoCommand::hold(self.carrier_nco, self.code_nco) }
	}

	fn worker() -> (ChannelWorker<Hold, Vec<Measurement>>, mpsc::UnboundedSender<AcquisitionResult>, Arc<ActiveChannels>) {
		let config = CorrelatorConfig{ carrier_bins: 40, ..Default::default() };
		let tables = Arc::new(ReplicaTables::generate(&config).unwrap());
		let active = Arc::new(ActiveChannels::new(1));
		let correlator = Correlator::new(0, &config, tables, active.clone()).unwrap();
		let (tx, rx) = mpsc::unbounded_channel();
		let w = ChannelWorker::new(correlator, Hold::default(), vec![], Arc::new(PacketFifo::new(4)), rx,
			Arc::new(AtomicBool::new(true)), Duration::from_micros(50), config.samples_per_ms());
		(w, tx, active)
	}

	fn read(count:u64, n:usize) -> FifoRead {
		FifoRead{ packet: Arc::new(Packet{ count, measurement: None, samples: vec![Complex{ re: 0, im: 0 }; n] }), skipped: 0 }
	}

	fn acq(prn:usize) -> AcquisitionResult {
		AcquisitionResult{ prn, doppler_hz: 1000.0, delay_chips: 12.0, class: AcquisitionClass::Strong, count: 0 }
	}

	#[test]
	fn short_packet_does_not_consume_a_pending_acquisition() {
		let (mut w, tx, active) = worker();
		assert_eq!(active.claim(5), Ok(0));
		tx.send(acq(5)).unwrap();

		let mut stats = WorkerStats::default();
		w.step(&read(0, 100), &mut stats).unwrap();
		assert_eq!(stats.short_packets, 1);
		assert_eq!(stats.activations, 0);
		assert!(!w.correlator.is_active());

		w.step(&read(1, 2048), &mut stats).unwrap();
		assert_eq!(stats.activations, 1);
		assert_eq!(stats.packets, 1);
		assert!(w.correlator.is_active());
		assert_eq!(w.correlator.state().prn, 5);
	}

	#[test]
	fn release_drops_queued_results_and_frees_the_slot() {
		let (mut w, tx, active) = worker();
		assert_eq!(active.claim(7), Ok(0));
		tx.send(acq(7)).unwrap();

		w.release();
		assert!(!active.is_tracking(7));
		assert!(tx.send(acq(7)).is_err());
	}

	#[test]
	fn failed_activation_frees_the_slot() {
		let (mut w, tx, active) = worker();
		active.activate(0, 40).unwrap();
		tx.send(acq(40)).unwrap();

		let mut stats = WorkerStats::default();
		w.step(&read(0, 2048), &mut stats).unwrap();
		assert_eq!(stats.activations, 0);
		assert!(!active.is_active(0));
	}
}
