//! The packet-I/O plane contract (§6): polled RX/TX bursts, mempool-backed
//! packet buffers, a monotonic clock. This crate only defines the contract
//! and an in-process [`loopback`] double implementing it -- real NIC/DPDK
//! bindings are outside this project's scope.

use std::collections::VecDeque;
use std::time::Duration;

use collections::bytes::Slice;
use log::{error, warn};

use crate::clock::Clock;

/// Maximum transmission unit the engine constructs packets against.
pub const MTU: usize = 1500;

/// Per-port offload metadata an implementation stamps onto outbound packets
/// (VLAN/QinQ/MACsec insertion, `l2_len`/`l3_len`). This engine never sets
/// any of these flags -- it carries the field so a real port implementation
/// has somewhere to read them from.
#[derive(Clone, Copy, Debug, Default)]
pub struct Metadata {
	pub l2_len: u16,
	pub l3_len: u16,
	pub vlan_insert: bool,
	pub qinq_insert: bool,
	pub macsec_insert: bool,
}

/// A polled packet port: batched RX/TX, mempool-backed buffer allocation,
/// a monotonic cycle counter. Implementations are run-to-completion and
/// never block except where documented (TX retry backoff).
pub trait PacketPort {
	/// Cycles per second of [`PacketPort::now_cycles`].
	fn timer_hz(&self) -> u64;

	/// The current value of the monotonic cycle counter.
	fn now_cycles(&self) -> u64;

	/// Allocates a zeroed packet buffer of `len` bytes from the mempool.
	/// Returns `None` on mempool exhaustion.
	fn alloc_packet(&mut self, len: usize) -> Option<Slice>;

	/// Returns a packet buffer to the mempool. A no-op for refcounted
	/// buffers that free themselves on drop; present so callers that
	/// explicitly release handles compile against real mempool-backed
	/// ports too.
	fn free_packet(&mut self, _packet: Slice) {}

	/// Receives up to `cap` packets into `out`, returning the count received.
	fn rx_burst(&mut self, out: &mut Vec<Slice>, cap: usize) -> usize;

	/// Attempts to transmit every packet in `batch`, in order, returning how
	/// many were accepted. Accepted packets are removed from the front of
	/// `batch`; unaccepted ones remain for the caller's retry policy.
	fn tx_burst(&mut self, batch: &mut VecDeque<Slice>) -> usize;
}

/// Flushes `batch` through `port`, retrying the unsent tail up to
/// `retry_num` times with `retry_delay` between attempts (§4.9). Returns the
/// number of packets left undelivered, which the caller counts as dropped.
pub fn flush_with_retry(port: &mut impl PacketPort, batch: &mut VecDeque<Slice>, retry_num: u32, retry_delay: Duration) -> usize {
	let offered = batch.len();

	let mut accepted = port.tx_burst(batch);

	for _ in 0..retry_num {
		if batch.is_empty() {
			break;
		}

		Clock::sleep(retry_delay);
		accepted += port.tx_burst(batch);
	}

	let dropped = batch.len();

	if dropped != 0 {
		warn!("TX burst dropped {dropped}/{offered} packets after retry");
		batch.clear();
	}

	dropped
}

/// An in-process pair of ports that deliver directly to each other's RX
/// queue, for exercising the engine without a real NIC.
pub mod loopback {
	use std::cell::RefCell;
	use std::rc::Rc;

	use super::*;

	struct Shared {
		clock: Clock,
		a_to_b: VecDeque<Slice>,
		b_to_a: VecDeque<Slice>,
	}

	/// One end of an in-process loopback pair. See [`pair`].
	pub struct Port {
		shared: Rc<RefCell<Shared>>,
		is_a: bool,
	}

	/// Creates two connected loopback ports sharing one clock: packets sent
	/// from `a` arrive on `b`'s `rx_burst` and vice versa.
	pub fn pair() -> (Port, Port) {
		let shared = Rc::new(RefCell::new(Shared {
			clock: Clock::new(),
			a_to_b: VecDeque::new(),
			b_to_a: VecDeque::new(),
		}));

		(Port { shared: shared.clone(), is_a: true }, Port { shared, is_a: false })
	}

	impl PacketPort for Port {
		fn timer_hz(&self) -> u64 {
			self.shared.borrow().clock.hz()
		}

		fn now_cycles(&self) -> u64 {
			self.shared.borrow().clock.now_cycles()
		}

		fn alloc_packet(&mut self, len: usize) -> Option<Slice> {
			if len > MTU {
				error!("Requested packet allocation of {len} bytes exceeds MTU {MTU}");
				return None;
			}

			Some(Slice::new(len))
		}

		fn rx_burst(&mut self, out: &mut Vec<Slice>, cap: usize) -> usize {
			let mut shared = self.shared.borrow_mut();
			let queue = if self.is_a { &mut shared.b_to_a } else { &mut shared.a_to_b };

			let n = cap.min(queue.len());

			out.extend(queue.drain(..n));

			n
		}

		fn tx_burst(&mut self, batch: &mut VecDeque<Slice>) -> usize {
			let mut shared = self.shared.borrow_mut();
			let queue = if self.is_a { &mut shared.a_to_b } else { &mut shared.b_to_a };

			let n = batch.len();
			queue.extend(batch.drain(..));

			n
		}
	}

	#[cfg(test)]
	mod tests {
		use super::*;

		#[test]
		fn packets_sent_from_a_arrive_on_b() {
			let (mut a, mut b) = pair();

			let mut tx = VecDeque::new();
			tx.push_back(a.alloc_packet(64).unwrap());

			assert_eq!(a.tx_burst(&mut tx), 1);

			let mut rx = Vec::new();
			assert_eq!(b.rx_burst(&mut rx, 8), 1);
			assert_eq!(rx.len(), 1);
		}

		#[test]
		fn rx_burst_respects_capacity() {
			let (mut a, mut b) = pair();

			let mut tx = VecDeque::new();
			for _ in 0..5 {
				tx.push_back(a.alloc_packet(64).unwrap());
			}
			a.tx_burst(&mut tx);

			let mut rx = Vec::new();
			assert_eq!(b.rx_burst(&mut rx, 3), 3);
			assert_eq!(b.rx_burst(&mut rx, 3), 2);
		}
	}
}
