//! Sender state machine (spec §4.5/§4.7): per-tick retransmission and flow
//! admission, plus the GRANT handler that drains a flow's scheduled
//! remainder as soon as each grant arrives.

use std::time::Duration;

use log::{debug, error, warn};
use net::eth::MacAddr;
use net::homa::{Body, Common, Packet};

use crate::consts::{MAX_REQUEST_RETRANSMIT_ONE_TIME, PRIO_CUT_OFF_BYTES, RETRANSMIT_TIMEOUT, RTT_BYTES, UNSCHEDULED_PRIORITY};
use crate::directory::Directory;
use crate::flow::{Flow, FlowState};
use crate::wire;
use runtime::port::PacketPort;

use super::SenderSide;

/// Maps a flow's total size to one of `UNSCHEDULED_PRIORITY` priority levels
/// by the first cut-off it falls strictly under, lowest cut-off first.
pub fn map_to_unscheduled_priority(flow_size: u32) -> u8 {
	for (level, &cutoff) in PRIO_CUT_OFF_BYTES.iter().enumerate() {
		if flow_size < cutoff {
			return level as u8;
		}
	}

	(UNSCHEDULED_PRIORITY - 1) as u8
}

fn resolve_dst_mac(directory: &Directory, dst_ip: core::net::Ipv4Addr) -> MacAddr {
	match directory.server_id_of(dst_ip).and_then(|id| directory.mac(id)) {
		Some(mac) => mac,
		None => {
			error!("no directory entry for destination {dst_ip}; constructing packet with a zeroed MAC");
			MacAddr::default()
		}
	}
}

fn close_if_drained(sender: &mut SenderSide, flow_id: usize) {
	if sender.flows[flow_id].remain_size == 0 && sender.flows[flow_id].flow_state != FlowState::SendClosed {
		sender.request_sent.remove(flow_id as u32);
		sender.flows[flow_id].flow_state = FlowState::SendClosed;
		sender.finished_flow_num += 1;
		debug!("flow {flow_id} fully sent");
	}
}

fn emit_grant_request(sender: &SenderSide, flow_id: usize, directory: &Directory, local_mac: MacAddr, port: &mut impl PacketPort) -> Option<collections::bytes::Slice> {
	let flow = &sender.flows[flow_id];
	let dst_mac = resolve_dst_mac(directory, flow.dst_ip);

	let packet = Packet {
		common: Common { src_port: flow.src_port, dst_port: flow.dst_port, sent_seq: flow.data_seqnum, recv_ack: 0, flow_id: flow_id as u16 },
		body: Body::GrantRequest { flow_size: flow.flow_size },
	};

	wire::build(port, local_mac, dst_mac, flow.src_ip, flow.dst_ip, 0, &packet, 0)
}

fn emit_data(sender: &mut SenderSide, directory: &Directory, local_mac: MacAddr, port: &mut impl PacketPort, flow_id: usize, ack_seq: u32, retry_num: u32, retry_delay: Duration) {
	let max_data_len = (wire::DEFAULT_PKT_SIZE - wire::HDR_ONLY_SIZE) as u32;

	let flow = &mut sender.flows[flow_id];
	let data_len = max_data_len.min(flow.remain_size);

	let packet = Packet {
		common: Common { src_port: flow.src_port, dst_port: flow.dst_port, sent_seq: flow.data_seqnum, recv_ack: ack_seq, flow_id: flow_id as u16 },
		body: Body::Data { data_len: data_len as u16 },
	};

	let (tos, src_ip, dst_ip) = (flow.granted_priority, flow.src_ip, flow.dst_ip);

	flow.data_seqnum += data_len;
	flow.remain_size -= data_len;

	let dst_mac = resolve_dst_mac(directory, dst_ip);

	if let Some(built) = wire::build(port, local_mac, dst_mac, src_ip, dst_ip, tos, &packet, data_len as usize) {
		if sender.burst.push(built) {
			sender.burst.flush(port, retry_num, retry_delay);
		}
	}

	close_if_drained(sender, flow_id);
}

fn admit(sender: &mut SenderSide, directory: &Directory, local_server_id: usize, flow_id: usize, now: f64) {
	if !sender.request_sent.insert(flow_id as u32) {
		error!("request-outstanding set is full; flow {flow_id} admitted without retransmission tracking");
	}

	sender.flows[flow_id].flow_state = FlowState::SendGrantRequestSent;
	sender.flows[flow_id].last_grant_request_sent_time = now;

	sender.next_unstart_flow_id = find_next_unstart_flow_id(&sender.flows, Some(sender.next_unstart_flow_id), directory, local_server_id);
}

/// Scans starting just after `after` (from the very first flow if `None`,
/// which is how `Engine::new` seeds the initial value -- mirroring the C
/// original's `init`-time seeding via this same scan, rather than assuming
/// flow 0 is always a local sender flow) for the next flow whose source is
/// this server, returning `flows.len()` (the sentinel meaning "none left")
/// if no such flow remains.
pub(crate) fn find_next_unstart_flow_id(flows: &[Flow], after: Option<usize>, directory: &Directory, local_server_id: usize) -> usize {
	let start = after.map_or(0, |i| i + 1);

	for i in start..flows.len() {
		if directory.server_id_of(flows[i].src_ip) == Some(local_server_id) {
			return i;
		}
	}

	flows.len()
}

fn retransmit_stalled_requests(sender: &mut SenderSide, directory: &Directory, local_mac: MacAddr, port: &mut impl PacketPort, now: f64, retry_num: u32, retry_delay: Duration) {
	let outstanding = sender.request_sent.iter().count();
	let max_checks = MAX_REQUEST_RETRANSMIT_ONE_TIME.min(outstanding);

	// `ActiveSet::find_next` only returns indices strictly greater than its
	// argument, and `insert` always fills slot 0 first -- so starting the
	// walk with `find_next(0)` would permanently skip a lone stalled flow
	// sitting in slot 0. Check slot 0 directly up front, then walk the rest
	// with `find_next` as usual.
	let mut scan_index = match sender.request_sent.get(0) {
		Some(_) => Some(0),
		None => sender.request_sent.find_next(0),
	};

	for _ in 0..max_checks {
		let Some(found_index) = scan_index else { break };

		let Some(flow_id) = sender.request_sent.get(found_index) else { continue };
		let flow_id = flow_id as usize;

		if now - sender.flows[flow_id].last_grant_request_sent_time > RETRANSMIT_TIMEOUT {
			warn!("retransmitting grant request for flow {flow_id}");

			if let Some(built) = emit_grant_request(sender, flow_id, directory, local_mac, port) {
				if sender.burst.push(built) {
					sender.burst.flush(port, retry_num, retry_delay);
				}
			}

			sender.flows[flow_id].last_grant_request_sent_time = now;
		}

		scan_index = sender.request_sent.find_next(found_index);
	}
}

fn admit_new_flows(
	sender: &mut SenderSide,
	directory: &Directory,
	local_server_id: usize,
	local_mac: MacAddr,
	port: &mut impl PacketPort,
	now: f64,
	flowgen_start_time: f64,
	retry_num: u32,
	retry_delay: Duration,
) {
	let unscheduled_pkt_count = RTT_BYTES.div_ceil(wire::DEFAULT_PKT_SIZE as u32) as usize;

	loop {
		let flow_id = sender.next_unstart_flow_id;
		if flow_id >= sender.flows.len() {
			break;
		}

		if sender.flows[flow_id].start_time + flowgen_start_time > now {
			break;
		}

		if let Some(built) = emit_grant_request(sender, flow_id, directory, local_mac, port) {
			if sender.burst.push(built) {
				sender.burst.flush(port, retry_num, retry_delay);
			}
		}

		admit(sender, directory, local_server_id, flow_id, now);

		let priority = map_to_unscheduled_priority(sender.flows[flow_id].flow_size);
		sender.flows[flow_id].granted_priority = priority;

		for _ in 0..unscheduled_pkt_count {
			emit_data(sender, directory, local_mac, port, flow_id, 0, retry_num, retry_delay);

			if sender.flows[flow_id].remain_size == 0 {
				break;
			}
		}
	}
}

/// One sender-side poll-loop tick (spec §4.7): flush the TX burst, retransmit
/// stalled grant requests, then admit any flow whose start time has arrived.
pub fn tick(
	sender: &mut SenderSide,
	directory: &Directory,
	local_server_id: usize,
	local_mac: MacAddr,
	port: &mut impl PacketPort,
	now: f64,
	flowgen_start_time: f64,
	retry_num: u32,
	retry_delay: Duration,
) {
	if !sender.burst.is_empty() {
		sender.burst.flush(port, retry_num, retry_delay);
	}

	retransmit_stalled_requests(sender, directory, local_mac, port, now, retry_num, retry_delay);
	admit_new_flows(sender, directory, local_server_id, local_mac, port, now, flowgen_start_time, retry_num, retry_delay);
}

/// Handles an inbound GRANT (spec §4.5/§4.7): records the grant, then sends
/// DATA for this flow up through the newly granted sequence number.
///
/// The source this was distilled from gates this emission behind inspecting
/// only the single most recently queued outbound packet, preempting in
/// sender-queue order when that tail packet is DATA for some other flow with
/// a larger remaining size -- a heuristic the design notes call out as
/// unsound for `sender_current_burst_size == 0` (reads one element before
/// the start of the burst array). Since every grant the receiver issues is
/// already for whichever flow its own SRPT sort favors (§4.8), sending
/// promptly on every grant reproduces the same relative transmission order
/// the tail-peek was approximating, without the empty-buffer case, and
/// without leaving a solitary flow's scheduled remainder permanently
/// unsent -- the tail-peek condition can never hold for a flow with no
/// concurrent peer, since it can only ever observe its own queued packet.
#[allow(clippy::too_many_arguments)]
pub fn on_grant(
	sender: &mut SenderSide,
	directory: &Directory,
	local_mac: MacAddr,
	port: &mut impl PacketPort,
	flow_id: usize,
	seq_granted: u32,
	priority: u8,
	ack_seq: u32,
	retry_num: u32,
	retry_delay: Duration,
) {
	let Some(flow) = sender.flows.get(flow_id) else {
		warn!("GRANT for out-of-range flow id {flow_id}");
		return;
	};

	match flow.flow_state {
		FlowState::SendGrantRequestSent => {
			sender.request_sent.remove(flow_id as u32);
			sender.flows[flow_id].flow_state = FlowState::SendGrantReceiving;
		}
		FlowState::SendGrantReceiving => {}
		_ => return,
	}

	sender.flows[flow_id].granted_seqnum = seq_granted;
	sender.flows[flow_id].granted_priority = priority;

	while sender.flows[flow_id].remain_size > 0 && sender.flows[flow_id].granted_seqnum > sender.flows[flow_id].data_seqnum {
		emit_data(sender, directory, local_mac, port, flow_id, ack_seq, retry_num, retry_delay);
	}
}

#[cfg(test)]
mod tests {
	use core::net::Ipv4Addr;

	use runtime::port::loopback;

	use super::*;
	use crate::flow::Flow;

	fn directory() -> Directory {
		let mut dir = Directory::new();
		dir.set_ip(0, Ipv4Addr::new(10, 0, 0, 1));
		dir.set_ip(1, Ipv4Addr::new(10, 0, 0, 2));
		dir.set_mac(0, MacAddr::new([1; 6]));
		dir.set_mac(1, MacAddr::new([2; 6]));
		dir
	}

	#[test]
	fn map_to_unscheduled_priority_follows_cut_offs() {
		assert_eq!(map_to_unscheduled_priority(0), 0);
		assert_eq!(map_to_unscheduled_priority(1999), 0);
		assert_eq!(map_to_unscheduled_priority(2000), 1);
		assert_eq!(map_to_unscheduled_priority(10_000), 5);
		assert_eq!(map_to_unscheduled_priority(50_000), 5);
	}

	#[test]
	fn admitting_a_short_flow_drains_it_entirely_via_the_unscheduled_burst() {
		let directory = directory();
		let (mut port, _peer) = loopback::pair();

		let flow = Flow::from_config(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), 100, 200, 1000, 0.0);
		let mut sender = SenderSide::new(vec![flow], 1);

		tick(&mut sender, &directory, 0, MacAddr::new([1; 6]), &mut port, 0.0, 0.0, 0, Duration::from_millis(0));

		assert_eq!(sender.flows[0].remain_size, 0);
		assert_eq!(sender.flows[0].flow_state, FlowState::SendClosed);
		assert_eq!(sender.finished_flow_num, 1);
		assert_eq!(sender.next_unstart_flow_id, 1);
	}

	#[test]
	fn a_flow_whose_start_time_has_not_arrived_is_left_untouched() {
		let directory = directory();
		let (mut port, _peer) = loopback::pair();

		let flow = Flow::from_config(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), 100, 200, 1000, 5.0);
		let mut sender = SenderSide::new(vec![flow], 1);

		tick(&mut sender, &directory, 0, MacAddr::new([1; 6]), &mut port, 0.0, 0.0, 0, Duration::from_millis(0));

		assert_eq!(sender.flows[0].flow_state, FlowState::SendGrantRequestSent);
		assert_eq!(sender.next_unstart_flow_id, 0);
	}

	#[test]
	fn retransmission_only_fires_once_timeout_has_elapsed() {
		let directory = directory();
		let (mut port, _peer) = loopback::pair();

		let flow = Flow::from_config(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), 100, 200, 30_000, 0.0);
		let mut sender = SenderSide::new(vec![flow], 1);

		// admits the flow; it keeps waiting on a grant since 30_000 > RTT_BYTES
		tick(&mut sender, &directory, 0, MacAddr::new([1; 6]), &mut port, 0.0, 0.0, 0, Duration::from_millis(0));
		assert_eq!(sender.flows[0].flow_state, FlowState::SendGrantRequestSent);

		let last_sent = sender.flows[0].last_grant_request_sent_time;

		// well within the timeout: no retransmission
		tick(&mut sender, &directory, 0, MacAddr::new([1; 6]), &mut port, 0.001, 0.0, 0, Duration::from_millis(0));
		assert_eq!(sender.flows[0].last_grant_request_sent_time, last_sent);

		// past RETRANSMIT_TIMEOUT: retransmits and refreshes the timestamp
		tick(&mut sender, &directory, 0, MacAddr::new([1; 6]), &mut port, 1.0, 0.0, 0, Duration::from_millis(0));
		assert_eq!(sender.flows[0].last_grant_request_sent_time, 1.0);
	}

	#[test]
	fn grant_for_a_closed_flow_is_ignored() {
		let directory = directory();
		let (mut port, _peer) = loopback::pair();

		let mut flow = Flow::from_config(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), 100, 200, 1000, 0.0);
		flow.flow_state = FlowState::SendClosed;
		flow.remain_size = 0;
		let mut sender = SenderSide::new(vec![flow], 1);

		on_grant(&mut sender, &directory, MacAddr::new([1; 6]), &mut port, 0, 20_000, 1, 0, 0, Duration::from_millis(0));

		assert_eq!(sender.flows[0].granted_seqnum, 0);
	}

	#[test]
	fn a_grant_drains_a_solitary_flows_scheduled_remainder() {
		let directory = directory();
		let (mut port, _peer) = loopback::pair();

		// larger than the unscheduled burst (RTT_BYTES=20000) can cover in one RTT.
		let flow = Flow::from_config(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), 100, 200, 21_500, 0.0);
		let mut sender = SenderSide::new(vec![flow], 1);

		tick(&mut sender, &directory, 0, MacAddr::new([1; 6]), &mut port, 0.0, 0.0, 0, Duration::from_millis(0));
		assert!(sender.flows[0].remain_size > 0, "flow should still have scheduled bytes left");
		assert_eq!(sender.flows[0].flow_state, FlowState::SendGrantRequestSent);

		let remain_before_grant = sender.flows[0].remain_size;
		let seq_granted = sender.flows[0].data_seqnum + remain_before_grant;

		on_grant(&mut sender, &directory, MacAddr::new([1; 6]), &mut port, 0, seq_granted, 0, 0, 0, Duration::from_millis(0));

		assert_eq!(sender.flows[0].remain_size, 0);
		assert_eq!(sender.flows[0].flow_state, FlowState::SendClosed);
	}
}
