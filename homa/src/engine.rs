//! The Main Poll Loop (spec §4.7/§4.8/§4.9 driver, §5): owns every piece of
//! mutable state and repeats sender tick → RX dispatch → receiver tick until
//! the hard deadline passes or both sides drain.

use core::net::Ipv4Addr;
use std::time::Duration;

use log::info;
use net::eth::MacAddr;
use net::homa::Body;
use runtime::clock::Clock;
use runtime::port::PacketPort;

use crate::burst::BURST_THRESHOLD;
use crate::completion;
use crate::consts::DEADLINE_SECS;
use crate::directory::Directory;
use crate::flow::Table;
use crate::scheduler::{self, ReceiverSide, SenderSide};
use crate::wire;

/// Tunables governing TX retry and start-up calibration (spec §4.9/§5);
/// everything else is a fixed constant per [`crate::consts`].
#[derive(Clone)]
pub struct Policy {
	pub retry_num: u32,
	pub retry_delay: Duration,
	pub calibration_delay: Duration,
	pub deadline_secs: f64,
}

impl Default for Policy {
	fn default() -> Self {
		Self { retry_num: 0, retry_delay: Duration::from_micros(0), calibration_delay: Duration::from_secs(2), deadline_secs: DEADLINE_SECS }
	}
}

/// Owns the Flow Table, Active-Set Registry, and both burst buffers for one
/// server's worth of the engine (spec §1: one polling core per engine).
pub struct Engine<P: PacketPort> {
	port: P,
	directory: Directory,
	local_server_id: usize,
	local_mac: MacAddr,
	local_ip: Ipv4Addr,
	sender: SenderSide,
	receiver: ReceiverSide,
	flowgen_start_time: f64,
	policy: Policy,
}

impl<P: PacketPort> Engine<P> {
	pub fn new(port: P, directory: Directory, local_server_id: usize, table: Table, sender_total_flow_num: usize, policy: Policy) -> Self {
		let local_mac = directory.mac(local_server_id).unwrap_or_default();
		let local_ip = directory.ip(local_server_id).unwrap_or(Ipv4Addr::UNSPECIFIED);

		let mut sender = SenderSide::new(table.sender, sender_total_flow_num);
		// Mirrors the C original's `init`-time seeding of
		// `sender_next_unstart_flow_id`: the first local sender flow isn't
		// necessarily flow 0 (a receiver-only engine's sender table is all
		// placeholders, and in a real multi-server config flow 0 may belong
		// to another server entirely).
		sender.next_unstart_flow_id = scheduler::sender::find_next_unstart_flow_id(&sender.flows, None, &directory, local_server_id);

		Self {
			port,
			directory,
			local_server_id,
			local_mac,
			local_ip,
			sender,
			receiver: ReceiverSide::new(table.receiver),
			flowgen_start_time: 0.0,
			policy,
		}
	}

	fn now(&self) -> f64 {
		self.port.now_cycles() as f64 / self.port.timer_hz() as f64
	}

	fn sender_tick(&mut self, now: f64) {
		scheduler::sender::tick(
			&mut self.sender,
			&self.directory,
			self.local_server_id,
			self.local_mac,
			&mut self.port,
			now,
			self.flowgen_start_time,
			self.policy.retry_num,
			self.policy.retry_delay,
		);
	}

	fn receiver_tick(&mut self) {
		scheduler::receiver::tick(&mut self.receiver, &self.directory, self.local_mac, &mut self.port, self.policy.retry_num, self.policy.retry_delay);
	}

	/// Receives and dispatches one burst of inbound packets (spec §4.9).
	fn dispatch_inbound(&mut self, now: f64) {
		let mut rx = Vec::new();
		self.port.rx_burst(&mut rx, BURST_THRESHOLD);

		for packet in rx {
			if let Some((src_ip, parsed)) = wire::parse(&packet, self.local_ip) {
				let flow_id = parsed.common.flow_id as usize;

				match parsed.body {
					Body::GrantRequest { flow_size } => {
						scheduler::receiver::on_grant_request(
							&mut self.receiver,
							flow_id,
							flow_size,
							parsed.common.src_port,
							parsed.common.dst_port,
							src_ip,
							self.local_ip,
							now,
						);
					}
					Body::Grant { seq_granted, priority } => {
						scheduler::sender::on_grant(
							&mut self.sender,
							&self.directory,
							self.local_mac,
							&mut self.port,
							flow_id,
							seq_granted,
							priority,
							parsed.common.sent_seq,
							self.policy.retry_num,
							self.policy.retry_delay,
						);
					}
					Body::Data { data_len } => {
						scheduler::receiver::on_data(&mut self.receiver, flow_id, parsed.common.sent_seq, data_len as u32, now);
					}
				}
			}

			self.port.free_packet(packet);
		}
	}

	/// One iteration of sender tick → RX dispatch → receiver tick → FCT reporting.
	pub fn step(&mut self) {
		let now = self.now();

		self.sender_tick(now);
		self.dispatch_inbound(now);
		self.receiver_tick();

		completion::report_finished(&mut self.receiver.flows);
	}

	/// True once both sides have finished every flow they were configured with.
	pub fn drained(&self) -> bool {
		self.sender.finished_flow_num >= self.sender.total_flow_num && self.receiver.finished_flow_num >= self.receiver.total_flow_num
	}

	/// This engine's sender-side flow table, for inspection by callers and tests.
	pub fn sender_flows(&self) -> &[crate::flow::Flow] {
		&self.sender.flows
	}

	/// This engine's receiver-side flow table, for inspection by callers and tests.
	pub fn receiver_flows(&self) -> &[crate::flow::Flow] {
		&self.receiver.flows
	}

	/// Runs the poll loop to completion (spec §5): two calibration sleeps,
	/// then `step` until the hard deadline passes or both sides drain.
	pub fn run(&mut self) {
		info!("waiting for link calibration");
		Clock::sleep(self.policy.calibration_delay);
		Clock::sleep(self.policy.calibration_delay);

		self.flowgen_start_time = self.now();
		let start = self.flowgen_start_time;

		loop {
			self.step();

			if self.now() - start > self.policy.deadline_secs || self.drained() {
				break;
			}
		}

		info!(
			"finished: sender {}/{}, receiver {}/{}",
			self.sender.finished_flow_num, self.sender.total_flow_num, self.receiver.finished_flow_num, self.receiver.total_flow_num
		);
	}
}
