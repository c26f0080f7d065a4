//! Receiver state machine (spec §4.6/§4.8): admits new flows on their first
//! GRANT_REQUEST, tracks arriving DATA against the cumulative ack, and grants
//! the `SCHEDULED_PRIORITY` smallest-remaining active flows every tick.

use core::net::Ipv4Addr;
use std::time::Duration;

use log::{debug, warn};
use net::eth::MacAddr;
use net::homa::{Body, Common, Packet};

use crate::consts::{PRIO_MAP, RTT_BYTES, SCHEDULED_PRIORITY};
use crate::directory::Directory;
use crate::flow::FlowState;
use crate::wire;
use runtime::port::PacketPort;

use super::ReceiverSide;

fn resolve_dst_mac(directory: &Directory, dst_ip: Ipv4Addr) -> MacAddr {
	match directory.server_id_of(dst_ip).and_then(|id| directory.mac(id)) {
		Some(mac) => mac,
		None => {
			log::error!("no directory entry for destination {dst_ip}; constructing packet with a zeroed MAC");
			MacAddr::default()
		}
	}
}

/// Handles an inbound GRANT_REQUEST (spec §4.6): admits the flow id into the
/// active set on its first arrival (a retransmitted request for a flow
/// already being served is a no-op), recording the reply path by swapping
/// the incoming packet's source/destination.
#[allow(clippy::too_many_arguments)]
pub fn on_grant_request(
	receiver: &mut ReceiverSide,
	flow_id: usize,
	flow_size: u32,
	pkt_src_port: u16,
	pkt_dst_port: u16,
	pkt_src_ip: Ipv4Addr,
	pkt_dst_ip: Ipv4Addr,
	now: f64,
) {
	let Some(existing) = receiver.flows.get(flow_id) else {
		warn!("GRANT_REQUEST for out-of-range flow id {flow_id}");
		return;
	};

	if existing.flow_state == FlowState::ReceiveGrantSending {
		return;
	}

	if !receiver.active.insert(flow_id as u32) {
		log::error!("receiver active set is full; dropping admission of flow {flow_id}");
		return;
	}

	debug!("admitted flow {flow_id}, size {flow_size}");

	receiver.total_flow_num += 1;

	let flow = &mut receiver.flows[flow_id];
	flow.flow_state = FlowState::ReceiveGrantSending;
	flow.flow_size = flow_size;
	flow.remain_size = flow_size;
	flow.src_port = pkt_dst_port;
	flow.dst_port = pkt_src_port;
	flow.src_ip = pkt_dst_ip;
	flow.dst_ip = pkt_src_ip;
	flow.start_time = now;
	flow.fct_printed = false;
	flow.flow_finished = false;
	flow.data_recv_next = 1;
	flow.data_seqnum = 1;
}

/// Handles an inbound DATA packet (spec §4.6): advances the cumulative ack by
/// `data_len` regardless of whether `sent_seq` matches what was expected --
/// loss is logged, not corrected, matching how the receiver tracks bytes
/// actually delivered rather than bytes in order.
pub fn on_data(receiver: &mut ReceiverSide, flow_id: usize, sent_seq: u32, data_len: u32, now: f64) {
	let Some(existing) = receiver.flows.get(flow_id) else {
		warn!("DATA for out-of-range flow id {flow_id}");
		return;
	};

	if existing.flow_state != FlowState::ReceiveGrantSending {
		return;
	}

	if sent_seq != existing.data_recv_next {
		warn!("flow {flow_id}: data loss detected (expected seq {}, got {sent_seq})", existing.data_recv_next);
	}

	let flow = &mut receiver.flows[flow_id];
	flow.data_recv_next += data_len;
	flow.remain_size = flow.remain_size.saturating_sub(data_len);

	if flow.remain_size == 0 {
		receiver.active.remove(flow_id as u32);
		flow.flow_state = FlowState::ReceiveClosed;
		flow.flow_finished = true;
		flow.finish_time = now;
		receiver.finished_flow_num += 1;
		debug!("flow {flow_id} fully received");
	}
}

fn emit_grant(receiver: &mut ReceiverSide, directory: &Directory, local_mac: MacAddr, port: &mut impl PacketPort, flow_id: usize, priority: u8, retry_num: u32, retry_delay: Duration) {
	let flow = &receiver.flows[flow_id];

	let packet = Packet {
		common: Common { src_port: flow.src_port, dst_port: flow.dst_port, sent_seq: flow.data_seqnum, recv_ack: 0, flow_id: flow_id as u16 },
		body: Body::Grant { seq_granted: flow.data_recv_next + RTT_BYTES, priority },
	};

	let (src_ip, dst_ip) = (flow.src_ip, flow.dst_ip);
	let dst_mac = resolve_dst_mac(directory, dst_ip);

	if let Some(built) = wire::build(port, local_mac, dst_mac, src_ip, dst_ip, 0, &packet, 0) {
		if receiver.burst.push(built) {
			receiver.burst.flush(port, retry_num, retry_delay);
		}
	}
}

/// One receiver-side poll-loop tick (spec §4.8): flush the TX burst, sort the
/// active set ascending by remaining size, then grant the
/// `SCHEDULED_PRIORITY` flows with the least left to receive.
pub fn tick(receiver: &mut ReceiverSide, directory: &Directory, local_mac: MacAddr, port: &mut impl PacketPort, retry_num: u32, retry_delay: Duration) {
	if !receiver.burst.is_empty() {
		receiver.burst.flush(port, retry_num, retry_delay);
	}

	let flows = &receiver.flows;
	receiver.active.sort_by_key(|flow_id| flows[flow_id as usize].remain_size);

	for i in 0..SCHEDULED_PRIORITY {
		let Some(flow_id) = receiver.active.get(i) else { break };
		emit_grant(receiver, directory, local_mac, port, flow_id as usize, PRIO_MAP[i], retry_num, retry_delay);
	}
}
