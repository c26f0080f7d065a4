//! RX/TX packet-burst buffers (spec §4.9): one queue per direction, flushed
//! when a threshold is reached or a scheduler tick explicitly demands it.

use std::collections::VecDeque;
use std::time::Duration;

use collections::bytes::Slice;
use log::trace;
use runtime::port::{flush_with_retry, PacketPort};

/// Flush threshold: a burst buffer is drained as soon as it reaches this many packets.
pub const BURST_THRESHOLD: usize = 32;

/// A per-direction packet-burst buffer.
#[derive(Default)]
pub struct Burst {
	queue: VecDeque<Slice>,
	pub tx_packets: u64,
}

impl Burst {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_empty(&self) -> bool {
		self.queue.is_empty()
	}

	pub fn len(&self) -> usize {
		self.queue.len()
	}

	/// Appends `packet`. Returns `true` once the buffer has reached
	/// [`BURST_THRESHOLD`], at which point the caller should flush immediately.
	pub fn push(&mut self, packet: Slice) -> bool {
		self.queue.push_back(packet);
		self.queue.len() >= BURST_THRESHOLD
	}

	/// Drains the buffer through `port`, retrying the unsent tail per policy.
	pub fn flush(&mut self, port: &mut impl PacketPort, retry_num: u32, retry_delay: Duration) {
		let offered = self.queue.len();
		if offered == 0 {
			return;
		}

		let dropped = flush_with_retry(port, &mut self.queue, retry_num, retry_delay);
		self.tx_packets += (offered - dropped) as u64;

		trace!("flushed burst: {}/{offered} accepted", offered - dropped);
	}
}
