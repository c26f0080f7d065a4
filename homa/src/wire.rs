//! Mechanical packet construction: lays Ethernet + IPv4 + the Homa
//! transport header (spec §4.1) into a packet-port-allocated buffer. The
//! wire framing itself is out of scope (spec §1); this module only wires
//! together `net::eth`/`net::ip::v4`/`net::homa` the way any caller would.

use core::mem::size_of;
use core::net::Ipv4Addr;

use collections::bytes::{Cursor, Slice};
use net::eth::MacAddr;
use net::{eth, homa, ip};
use runtime::port::PacketPort;

pub const L2_LEN: usize = size_of::<eth::Header>();
pub const L3_LEN: usize = size_of::<ip::v4::Header>();
pub const L4_LEN: usize = size_of::<homa::Header>();
pub const HDR_ONLY_SIZE: usize = L2_LEN + L3_LEN + L4_LEN;
pub const DEFAULT_PKT_SIZE: usize = 1500;

/// Allocates a packet from `port` and writes `packet`'s header followed by
/// `payload_len` zero bytes, framed in Ethernet/IPv4 per spec §4.1.
pub fn build(
	port: &mut impl PacketPort,
	src_mac: MacAddr,
	dst_mac: MacAddr,
	src_ip: Ipv4Addr,
	dst_ip: Ipv4Addr,
	tos: u8,
	packet: &homa::Packet,
	payload_len: usize,
) -> Option<Slice> {
	let total_len = HDR_ONLY_SIZE + payload_len;
	let mut buf = vec![0u8; total_len];

	Cursor::vec(&mut buf, |cur| {
		let (eth_hdr, cur) = cur.split::<eth::Header>();
		eth::build_header(eth_hdr, src_mac, dst_mac);

		ip::v4::write(cur, src_ip, dst_ip, tos, |cur| {
			let (homa_hdr, cur) = cur.split::<homa::Header>();
			packet.encode(homa_hdr);

			let zeros = vec![0u8; payload_len];
			cur.push(&zeros[..]);
		});
	});

	let mut out = port.alloc_packet(total_len)?;
	out.copy_from_slice(&buf);
	Some(out)
}

/// Parses `packet`'s Ethernet/IPv4/Homa headers, returning the decoded Homa
/// packet and the IP source address it arrived from. `local` is this
/// server's own IPv4 address (the expected IP destination).
pub fn parse(packet: &Slice, local: Ipv4Addr) -> Option<(Ipv4Addr, homa::Packet)> {
	let _eth: &eth::Header = packet.split();
	let (src_ip, _payload_len) = ip::v4::parse_header(packet, local).ok()?;

	let homa_hdr: &homa::Header = packet.split();
	let packet = homa::Packet::decode(homa_hdr)?;

	Some((src_ip, packet))
}

#[cfg(test)]
mod tests {
	use std::collections::VecDeque;

	use net::homa::{Body, Common};
	use runtime::port::loopback;

	use super::*;

	#[test]
	fn build_then_parse_roundtrips_a_data_packet() {
		let (mut a, mut b) = loopback::pair();

		let packet = homa::Packet {
			common: Common { src_port: 100, dst_port: 200, sent_seq: 1, recv_ack: 0, flow_id: 7 },
			body: Body::Data { data_len: 10 },
		};

		let src_ip = Ipv4Addr::new(10, 0, 0, 1);
		let dst_ip = Ipv4Addr::new(10, 0, 0, 2);

		let built = build(&mut a, MacAddr::new([1; 6]), MacAddr::new([2; 6]), src_ip, dst_ip, 0, &packet, 10).unwrap();
		assert_eq!(built.len(), HDR_ONLY_SIZE + 10);

		let mut tx = VecDeque::new();
		tx.push_back(built);
		a.tx_burst(&mut tx);

		let mut rx = Vec::new();
		b.rx_burst(&mut rx, 1);

		let (decoded_src, decoded) = parse(&rx[0], dst_ip).unwrap();
		assert_eq!(decoded_src, src_ip);
		assert_eq!(decoded, packet);
	}
}
