
use std::collections::VecDeque;
use std::io::{ErrorKind, Read};
use std::sync::{Arc, Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};

use byteorder::{ByteOrder, LittleEndian};
use log::warn;
use num_complex::Complex;
use rand_distr::{Distribution, Normal};

use crate::CorrelatorErr;
use crate::gnss::gps_l1_ca::config::CorrelatorConfig;
use crate::gnss::gps_l1_ca::signal_modulation::IfSignal;

pub const BYTES_PER_SAMPLE:usize = 4;
pub const DEFAULT_FIFO_CAPACITY:usize = 64;

/// One millisecond of IF samples from the front end
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Packet {
	pub count: u64,
	/// Measurement tick this packet closes, if any
	pub measurement: Option<u32>,
	pub samples: Vec<Complex<i16>>,
}

/// Tag every packet that starts a new measurement tick
fn measurement_tag(count:u64, packets_per_tick:u64) -> Option<u32> {
	if count % packets_per_tick == 0 { Some((count / packets_per_tick) as u32) } else { None }
}

fn packets_per_tick(config:&CorrelatorConfig) -> u64 { (1000 / config.ticks_per_second).max(1) as u64 }

/// A packet handed to a channel, with the number of packets it never saw because they were
/// overwritten first
#[derive(Debug, Clone)]
pub struct FifoRead {
	pub packet: Arc<Packet>,
	pub skipped: u64,
}

#[derive(Debug, Clone)]
pub enum FifoPoll {
	Ready(FifoRead),
	/// Nothing new yet
	Pending,
	/// Nothing new and nothing more will come
	Closed,
}

/// Bounded packet history shared by every channel.  The producer never blocks: once full, the
/// oldest packet is dropped.  Each reader keeps its own position as the last count it saw.
#[derive(Debug)]
pub struct PacketFifo {
	slots: Mutex<VecDeque<Arc<Packet>>>,
	capacity: usize,
	closed: AtomicBool,
}

impl PacketFifo {

	pub fn new(capacity:usize) -> Self {
		let capacity = capacity.max(1);
		Self{ slots: Mutex::new(VecDeque::with_capacity(capacity)), capacity, closed: AtomicBool::new(false) }
	}

	fn lock(&self) -> MutexGuard<VecDeque<Arc<Packet>>> {
		self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	pub fn capacity(&self) -> usize { self.capacity }

	pub fn enqueue(&self, packet:Packet) {
		let mut slots = self.lock();
		if slots.len() >= self.capacity { slots.pop_front(); }
		slots.push_back(Arc::new(packet));
	}

	/// The oldest packet newer than `last`, or the oldest held at all when `last` is None
	pub fn next_after(&self, last:Option<u64>) -> Option<FifoRead> {
		let slots = self.lock();
		let packet = match last {
			Some(last) => slots.iter().find(|p| p.count > last)?,
			None => slots.front()?,
		};
		let skipped = match last {
			Some(last) => packet.count - last - 1,
			None => 0,
		};
		Some(FifoRead{ packet: packet.clone(), skipped })
	}

	/// Like `next_after`, but tells an empty FIFO that may still grow apart from one that is
	/// closed and drained.  The closed flag is read before the packets, so a packet enqueued
	/// right before `close` is always returned.
	pub fn poll(&self, last:Option<u64>) -> FifoPoll {
		let closed = self.is_closed();
		match self.next_after(last) {
			Some(read) => FifoPoll::Ready(read),
			None if closed => FifoPoll::Closed,
			None => FifoPoll::Pending,
		}
	}

	/// Packets newer than `last` still waiting to be read
	pub fn backlog(&self, last:Option<u64>) -> usize {
		let slots = self.lock();
		match last {
			Some(last) => slots.iter().filter(|p| p.count > last).count(),
			None => slots.len(),
		}
	}

	/// No more packets will be enqueued
	pub fn close(&self) { self.closed.store(true, Ordering::SeqCst); }
	pub fn is_closed(&self) -> bool { self.closed.load(Ordering::SeqCst) }

}

/// Reads little-endian interleaved 16-bit I/Q from any byte stream, one packet per millisecond
pub struct PacketReader<R: Read> {
	src: R,
	buffer: Vec<u8>,
	packets_per_tick: u64,
	count: u64,
	done: bool,
}

impl<R: Read> PacketReader<R> {

	pub fn new(src:R, config:&CorrelatorConfig) -> Self {
		Self{ src, buffer: vec![0u8; config.samples_per_ms() * BYTES_PER_SAMPLE],
			packets_per_tick: packets_per_tick(config), count: 0, done: false }
	}

	pub fn count(&self) -> u64 { self.count }

	fn fill(&mut self) -> Result<usize, CorrelatorErr> {
		let mut filled = 0;
		while filled < self.buffer.len() {
			match self.src.read(&mut self.buffer[filled..]) {
				Ok(0) => break,
				Ok(n) => filled += n,
				Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
				Err(e) => return Err(e.into()),
			}
		}
		Ok(filled)
	}

}

impl<R: Read> Iterator for PacketReader<R> {
	type Item = Result<Packet, CorrelatorErr>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.done { return None; }

		let filled = match self.fill() {
			Ok(n) => n,
			Err(e) => { self.done = true; return Some(Err(e)); }
		};

		if filled == 0 {
			self.done = true;
			return None;
		}

		if filled < self.buffer.len() {
			// A partial packet can only be the tail of the stream
			self.done = true;
			return Some(Err(CorrelatorErr::ShortRead{ expected: self.buffer.len() / BYTES_PER_SAMPLE, got: filled / BYTES_PER_SAMPLE }));
		}

		let samples:Vec<Complex<i16>> = self.buffer.chunks_exact(BYTES_PER_SAMPLE).map(|b| {
			Complex{ re: LittleEndian::read_i16(&b[0..2]), im: LittleEndian::read_i16(&b[2..4]) }
		}).collect();

		let count = self.count;
		self.count += 1;
		Some(Ok(Packet{ count, measurement: measurement_tag(count, self.packets_per_tick), samples }))
	}
}

/// Sum of simulated satellites plus Gaussian receiver noise, packetized like the front end
pub struct SyntheticSource {
	signals: Vec<IfSignal>,
	noise: Option<Normal<f64>>,
	samples_per_packet: usize,
	packets_per_tick: u64,
	count: u64,
}

impl SyntheticSource {

	pub fn new(signals:Vec<IfSignal>, noise_sigma:f64, config:&CorrelatorConfig) -> Result<Self, CorrelatorErr> {
		let noise = if noise_sigma > 0.0 {
			Some(Normal::new(0.0, noise_sigma).map_err(|_| CorrelatorErr::InvalidConfig("noise sigma must be finite"))?)
		} else { None };
		Ok(Self{ signals, noise, samples_per_packet: config.samples_per_ms(), packets_per_tick: packets_per_tick(config), count: 0 })
	}

}

impl Iterator for SyntheticSource {
	type Item = Packet;

	fn next(&mut self) -> Option<Packet> {
		let n = self.samples_per_packet;
		let mut acc:Vec<Complex<f64>> = vec![Complex{ re: 0.0, im: 0.0 }; n];
		for sig in self.signals.iter_mut() {
			let start = sig.sample_idx();
			for (k, a) in acc.iter_mut().enumerate() { *a += sig.sample(start + k as u64); }
			sig.skip(n);
		}
		if let Some(normal) = &self.noise {
			let mut rng = rand::thread_rng();
			for a in acc.iter_mut() {
				a.re += normal.sample(&mut rng);
				a.im += normal.sample(&mut rng);
			}
		}

		let samples = acc.into_iter().map(|a| Complex{ re: a.re.round() as i16, im: a.im.round() as i16 }).collect();
		let count = self.count;
		self.count += 1;
		Some(Packet{ count, measurement: measurement_tag(count, self.packets_per_tick), samples })
	}
}

/// Pump packets from `src` into `fifo` until the source ends or `run` is cleared, then close
/// the FIFO.  Returns the number of packets delivered.
pub fn pump<I>(src:I, fifo:&PacketFifo, run:&AtomicBool, pace:Option<std::time::Duration>) -> Result<u64, CorrelatorErr>
	where I: Iterator<Item=Result<Packet, CorrelatorErr>> {

	let mut delivered = 0;
	let mut result = Ok(());
	for packet in src {
		if !run.load(Ordering::SeqCst) { break; }
		match packet {
			Ok(packet) => {
				fifo.enqueue(packet);
				delivered += 1;
			},
			Err(CorrelatorErr::ShortRead{ expected, got }) => {
				warn!("Dropping {} trailing samples, a packet needs {}", got, expected);
				break;
			},
			Err(e) => { result = Err(e); break; }
		}
		if let Some(pace) = pace { std::thread::sleep(pace); }
	}
	fifo.close();
	result.map(|_| delivered)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Cursor;

	fn packet(count:u64) -> Packet { Packet{ count, measurement: None, samples: vec![] } }

	#[test]
	fn fifo_drops_oldest_when_full() {
		let fifo = PacketFifo::new(3);
		for c in 0..5 { fifo.enqueue(packet(c)); }
		let read = fifo.next_after(None).unwrap();
		assert_eq!(read.packet.count, 2);
		assert_eq!(read.skipped, 0);
		assert_eq!(fifo.backlog(None), 3);
	}

	#[test]
	fn fifo_reports_gaps() {
		let fifo = PacketFifo::new(3);
		for c in 0..6 { fifo.enqueue(packet(c)); }
		let read = fifo.next_after(Some(0)).unwrap();
		assert_eq!(read.packet.count, 3);
		assert_eq!(read.skipped, 2);

		let read = fifo.next_after(Some(4)).unwrap();
		assert_eq!(read.packet.count, 5);
		assert_eq!(read.skipped, 0);
		assert!(fifo.next_after(Some(5)).is_none());
		assert_eq!(fifo.backlog(Some(3)), 2);
	}

	#[test]
	fn poll_drains_a_closed_fifo_before_reporting_closed() {
		let fifo = PacketFifo::new(4);
		fifo.enqueue(packet(0));
		assert!(matches!(fifo.poll(Some(0)), FifoPoll::Pending));

		// Last packet lands just before the producer closes
		fifo.enqueue(packet(1));
		fifo.close();
		match fifo.poll(Some(0)) {
			FifoPoll::Ready(read) => assert_eq!(read.packet.count, 1),
			other => panic!("expected packet 1, got {:?}", other),
		}
		assert!(matches!(fifo.poll(Some(1)), FifoPoll::Closed));
		assert!(matches!(fifo.poll(None), FifoPoll::Ready(_)));
	}

	#[test]
	fn reader_decodes_little_endian_iq() {
		let config = CorrelatorConfig{ sample_freq_hz: 4.0e3, ticks_per_second: 500, ..Default::default() };
		// 4 samples per packet, 2 packets per tick
		let mut bytes:Vec<u8> = vec![];
		for k in 0..12i16 {
			let mut b = [0u8; 4];
			LittleEndian::write_i16(&mut b[0..2], k);
			LittleEndian::write_i16(&mut b[2..4], -k);
			bytes.extend_from_slice(&b);
		}
		let packets:Vec<Packet> = PacketReader::new(Cursor::new(bytes), &config).map(|p| p.unwrap()).collect();
		assert_eq!(packets.len(), 3);
		assert_eq!(packets[1].samples[0], Complex{ re: 4, im: -4 });
		assert_eq!(packets[2].samples[3], Complex{ re: 11, im: -11 });
		assert_eq!(packets.iter().map(|p| p.measurement).collect::<Vec<_>>(), vec![Some(0), None, Some(1)]);
	}

	#[test]
	fn reader_stops_after_short_read() {
		let config = CorrelatorConfig{ sample_freq_hz: 4.0e3, ticks_per_second: 500, ..Default::default() };
		let bytes = vec![0u8; 4*4 + 6];
		let mut reader = PacketReader::new(Cursor::new(bytes), &config);
		assert!(reader.next().unwrap().is_ok());
		assert_eq!(reader.next().unwrap(), Err(CorrelatorErr::ShortRead{ expected: 4, got: 1 }));
		assert!(reader.next().is_none());
	}

	#[test]
	fn pump_closes_fifo_at_end_of_stream() {
		let config = CorrelatorConfig{ sample_freq_hz: 4.0e3, ticks_per_second: 500, ..Default::default() };
		let fifo = PacketFifo::new(8);
		let run = AtomicBool::new(true);
		let reader = PacketReader::new(Cursor::new(vec![0u8; 4*4*5 + 2]), &config);
		assert_eq!(pump(reader, &fifo, &run, None), Ok(5));
		assert!(fifo.is_closed());
		assert_eq!(fifo.backlog(None), 5);
	}

	#[test]
	fn synthetic_source_tags_ticks() {
		let config = CorrelatorConfig::default();
		let sig = IfSignal::new(4, config.sample_freq_hz, config.if_freq_hz, 0.0, 0.0, 500.0).unwrap();
		let mut src = SyntheticSource::new(vec![sig], 0.0, &config).unwrap();
		let packets:Vec<Packet> = (&mut src).take(101).collect();
		assert_eq!(packets[0].samples.len(), 2048);
		assert_eq!(packets[0].measurement, Some(0));
		assert_eq!(packets[99].measurement, None);
		assert_eq!(packets[100].measurement, Some(1));
	}
}
