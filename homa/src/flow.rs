//! Flow Table (spec §3 / §4.3 / §4.5 / §4.6): two parallel tables, indexed
//! by flow id, each entry a per-direction flow state record. One record
//! type serves both tables, mirroring the single `struct flow_info` the
//! original reuses for `sender_flows[]` and `receiver_flows[]` -- some
//! fields are meaningful on only one side.

use core::net::Ipv4Addr;

/// Raw discriminants match the wire-adjacent state bytes of the source
/// program (`HOMA_SEND_*` / `HOMA_RECEIVE_*`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FlowState {
	SendGrantRequestSent = 0x00,
	SendGrantReceiving = 0x01,
	SendClosed = 0x02,
	ReceiveGrantSending = 0x03,
	ReceiveClosed = 0x04,
}

/// A per-flow, per-direction state record.
#[derive(Clone, Debug)]
pub struct Flow {
	pub src_ip: Ipv4Addr,
	pub dst_ip: Ipv4Addr,
	pub src_port: u16,
	pub dst_port: u16,

	pub flow_state: FlowState,
	/// Total message size in bytes.
	pub flow_size: u32,
	/// Bytes not yet sent (sender) / not yet received (receiver).
	pub remain_size: u32,
	pub start_time: f64,
	pub finish_time: f64,
	pub fct_printed: bool,
	pub flow_finished: bool,

	/// Next byte sequence number to send (sender only).
	pub data_seqnum: u32,
	/// Next byte sequence number expected from the peer (receiver only).
	pub data_recv_next: u32,
	/// Highest sequence number the sender is currently permitted to send up to.
	pub granted_seqnum: u32,
	/// Priority at which the sender is currently permitted to transmit (sender only).
	pub granted_priority: u8,
	/// Sender-only: timestamp of the most recent GRANT_REQUEST transmission for this flow.
	pub last_grant_request_sent_time: f64,
}

impl Flow {
	/// A sender-side record populated from a `flow_info.txt` line (spec §4.3).
	pub fn from_config(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, src_port: u16, dst_port: u16, flow_size: u32, start_time: f64) -> Self {
		Self {
			src_ip,
			dst_ip,
			src_port,
			dst_port,
			flow_state: FlowState::SendGrantRequestSent,
			flow_size,
			remain_size: flow_size,
			start_time,
			finish_time: 0.0,
			fct_printed: false,
			flow_finished: false,
			data_seqnum: 1,
			data_recv_next: 0,
			granted_seqnum: 0,
			granted_priority: 0,
			last_grant_request_sent_time: 0.0,
		}
	}
}

impl Default for Flow {
	/// The receiver-side placeholder before any GRANT_REQUEST has arrived for
	/// this flow id; every field is overwritten on admission (spec §4.6).
	fn default() -> Self {
		Self {
			src_ip: Ipv4Addr::UNSPECIFIED,
			dst_ip: Ipv4Addr::UNSPECIFIED,
			src_port: 0,
			dst_port: 0,
			flow_state: FlowState::ReceiveClosed,
			flow_size: 0,
			remain_size: 0,
			start_time: 0.0,
			finish_time: 0.0,
			fct_printed: false,
			flow_finished: false,
			data_seqnum: 0,
			data_recv_next: 0,
			granted_seqnum: 0,
			granted_priority: 0,
			last_grant_request_sent_time: 0.0,
		}
	}
}

/// The two parallel per-flow-id tables (spec §3: "two parallel tables").
pub struct Table {
	pub sender: Vec<Flow>,
	pub receiver: Vec<Flow>,
}

impl Table {
	pub fn with_capacity(total_flow_num: usize) -> Self {
		Self {
			sender: (0..total_flow_num).map(|_| Flow::default()).collect(),
			receiver: (0..total_flow_num).map(|_| Flow::default()).collect(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn from_config_seeds_remain_size_and_first_seqnum() {
		let flow = Flow::from_config(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), 100, 200, 1000, 0.5);

		assert_eq!(flow.remain_size, flow.flow_size);
		assert_eq!(flow.data_seqnum, 1);
		assert_eq!(flow.flow_state, FlowState::SendGrantRequestSent);
	}

	#[test]
	fn table_allocates_both_sides_at_requested_size() {
		let table = Table::with_capacity(4);
		assert_eq!(table.sender.len(), 4);
		assert_eq!(table.receiver.len(), 4);
	}
}
