//! The transport header: `struct tcp_hdr` field names carrying unrelated
//! semantics. Field-for-field:
//!
//! | tcp_hdr field | reused as                                            |
//! |---------------|-------------------------------------------------------|
//! | src_port      | src_port (network order)                              |
//! | dst_port      | dst_port (network order)                              |
//! | sent_seq      | sender's data_seqnum at emit time (network order)     |
//! | recv_ack      | receiver's cumulative ack (network order)             |
//! | data_off      | PRIORITY_GRANTED (GRANT only)                         |
//! | tcp_flags     | PKT_TYPE                                              |
//! | rx_win        | FLOW_ID (network order)                               |
//! | cksum         | FLOW_SIZE/SEQ_GRANTED high 16 bits, **native** order   |
//! | tcp_urp       | FLOW_SIZE/SEQ_GRANTED low 16 bits, or DATA_LEN         |
//!
//! The high/low split on FLOW_SIZE and SEQ_GRANTED is interop-critical: the
//! low half travels big-endian like every other multi-byte field, but the
//! high half travels in whatever order the local CPU uses, because the
//! original program never byte-swapped the checksum field it borrowed to
//! carry it. Getting this wrong breaks interop silently -- both ends still
//! parse a packet, just the wrong `flow_size`.

use utils::bytes::Cast;
use utils::endian::{u16be, u16ne, u32be};

pub const PKT_TYPE_GRANT_REQUEST: u8 = 0x10;
pub const PKT_TYPE_GRANT: u8 = 0x11;
pub const PKT_TYPE_DATA: u8 = 0x12;

/// The fixed 20-byte transport header, laid out exactly as `struct tcp_hdr`.
#[derive(Cast)]
#[repr(C)]
pub struct Header {
	pub src_port: u16be,
	pub dst_port: u16be,
	pub sent_seq: u32be,
	pub recv_ack: u32be,
	pub priority_granted: u8,
	pub pkt_type: u8,
	pub flow_id: u16be,
	pub high16: u16ne,
	pub low16: u16be,
}

/// Fields common to every packet, independent of `body`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Common {
	pub src_port: u16,
	pub dst_port: u16,
	pub sent_seq: u32,
	pub recv_ack: u32,
	pub flow_id: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Body {
	GrantRequest { flow_size: u32 },
	Grant { seq_granted: u32, priority: u8 },
	Data { data_len: u16 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Packet {
	pub common: Common,
	pub body: Body,
}

fn split_low_high(v: u32) -> (u16, u16) {
	((v & 0xffff) as u16, (v >> 16) as u16)
}

fn join_low_high(low: u16, high: u16) -> u32 {
	((high as u32) << 16) | low as u32
}

impl Packet {
	/// Serializes this packet into `header`, reproducing the native/network split exactly.
	pub fn encode(&self, header: &mut Header) {
		header.src_port = u16be::new(self.common.src_port);
		header.dst_port = u16be::new(self.common.dst_port);
		header.sent_seq = u32be::new(self.common.sent_seq);
		header.recv_ack = u32be::new(self.common.recv_ack);
		header.flow_id = u16be::new(self.common.flow_id);

		match self.body {
			Body::GrantRequest { flow_size } => {
				let (low, high) = split_low_high(flow_size);
				header.pkt_type = PKT_TYPE_GRANT_REQUEST;
				header.priority_granted = 0;
				header.low16 = u16be::new(low);
				header.high16 = u16ne::new(high);
			}
			Body::Grant { seq_granted, priority } => {
				let (low, high) = split_low_high(seq_granted);
				header.pkt_type = PKT_TYPE_GRANT;
				header.priority_granted = priority;
				header.low16 = u16be::new(low);
				header.high16 = u16ne::new(high);
			}
			Body::Data { data_len } => {
				header.pkt_type = PKT_TYPE_DATA;
				header.priority_granted = 0;
				header.low16 = u16be::new(data_len);
				header.high16 = u16ne::new(0);
			}
		}
	}

	/// Parses a packet out of `header`. Returns `None` for an unrecognized `PKT_TYPE`.
	pub fn decode(header: &Header) -> Option<Self> {
		let common = Common {
			src_port: header.src_port.get(),
			dst_port: header.dst_port.get(),
			sent_seq: header.sent_seq.get(),
			recv_ack: header.recv_ack.get(),
			flow_id: header.flow_id.get(),
		};

		let body = match header.pkt_type {
			PKT_TYPE_GRANT_REQUEST => Body::GrantRequest { flow_size: join_low_high(header.low16.get(), header.high16.get()) },
			PKT_TYPE_GRANT => Body::Grant {
				seq_granted: join_low_high(header.low16.get(), header.high16.get()),
				priority: header.priority_granted,
			},
			PKT_TYPE_DATA => Body::Data { data_len: header.low16.get() },
			_ => return None,
		};

		Some(Self { common, body })
	}
}
