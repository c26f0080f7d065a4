use core::fmt;
use core::net::Ipv4Addr;

use collections::bytes::{Cursor, Slice};
use log::warn;
use utils::bytes::{self, Cast, Unaligned};
use utils::endian::u16be;
use utils::error::*;

use crate::ip::Checksum;

/// `version_ihl` for a 20-byte header with no options: version 4, IHL 5.
pub const VERSION_IHL: u8 = 0x45;

/// An IPv4 address stored in its on-wire byte order, castable out of a packet buffer.
#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Addr([u8; 4]);

impl Addr {
	pub const fn octets(self) -> [u8; 4] {
		self.0
	}
}

impl From<Ipv4Addr> for Addr {
	fn from(addr: Ipv4Addr) -> Self {
		Self(addr.octets())
	}
}

impl From<Addr> for Ipv4Addr {
	fn from(addr: Addr) -> Self {
		Ipv4Addr::from(addr.0)
	}
}

impl fmt::Debug for Addr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(&Ipv4Addr::from(*self), f)
	}
}

impl fmt::Display for Addr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(&Ipv4Addr::from(*self), f)
	}
}

unsafe impl Cast for Addr {}
unsafe impl Unaligned for Addr {}

/// A fixed 20-byte IPv4 header (no options), laid out exactly as it appears on the wire.
#[derive(Cast)]
#[repr(C)]
pub struct Header {
	pub ver_ihl: u8,
	pub tos: u8,
	pub total_len: u16be,
	pub id: u16be,
	pub flags_frag: u16be,
	pub ttl: u8,
	pub protocol: u8,
	pub checksum: u16be,
	pub src: Addr,
	pub dst: Addr,
}

/// IP protocol numbers this engine cares about.
pub const PROTO_TCP: u8 = 6;

/// Fills in `header` for an outbound packet and finalizes its checksum.
///
/// `payload_len` is the number of bytes following the header (transport header + data).
pub fn build_header(header: &mut Header, src: Ipv4Addr, dst: Ipv4Addr, tos: u8, payload_len: usize) {
	header.ver_ihl = VERSION_IHL;
	header.tos = tos;
	header.total_len = u16be::new((core::mem::size_of::<Header>() + payload_len) as u16);
	header.id = u16be::new(0);
	header.flags_frag = u16be::new(0);
	header.ttl = 64;
	header.protocol = PROTO_TCP;
	header.checksum = u16be::new(0);
	header.src = src.into();
	header.dst = dst.into();

	let sum = Checksum::of(bytes::as_slice(header)).end();
	header.checksum = u16be::new(u16::from_ne_bytes(sum));
}

/// Validates an inbound IPv4 header and strips it off `buf`, leaving the transport payload.
///
/// Returns the packet's source address and the header's declared total length minus its own
/// size (the transport + data payload length) on success.
pub fn parse_header(buf: &Slice, local: Ipv4Addr) -> Result<(Ipv4Addr, usize)> {
	let header: &Header = buf.split();

	let ihl = (header.ver_ihl & 0x0f) as usize * 4;

	if ihl < core::mem::size_of::<Header>() {
		return Err(warn!("IPv4 header claims an implausibly small IHL"));
	}

	let options = buf.split_n::<u8>(ihl - core::mem::size_of::<Header>());

	if Ipv4Addr::from(header.dst) != local {
		return Err(warn!(
			"Found IP packet with destination {}, expected {local}",
			Ipv4Addr::from(header.dst)
		));
	}

	if header.protocol != PROTO_TCP {
		return Err(warn!("Unsupported IP protocol {}", header.protocol));
	}

	if header.checksum != u16be::new(0) {
		let mut csum = Checksum::of(bytes::as_slice(header));
		csum.push(options);

		if csum.end() != [0, 0] {
			return Err(warn!("IPv4 packet has invalid header checksum"));
		}
	}

	let src = Ipv4Addr::from(header.src);
	let payload_len = header.total_len.get() as usize - ihl;
	buf.truncate(payload_len);

	Ok((src, payload_len))
}

/// Writes a header into the front of `buf`, calling `f` to fill in the payload that follows.
pub fn write(buf: Cursor, src: Ipv4Addr, dst: Ipv4Addr, tos: u8, f: impl FnOnce(Cursor)) {
	let (header, mut buf) = buf.split();

	f(buf.fork());

	build_header(header, src, dst, tos, buf.pivot());
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn checksum_roundtrips_to_zero() {
		let mut header = Header {
			ver_ihl: VERSION_IHL,
			tos: 0,
			total_len: u16be::new(20),
			id: u16be::new(0),
			flags_frag: u16be::new(0),
			ttl: 64,
			protocol: PROTO_TCP,
			checksum: u16be::new(0),
			src: Ipv4Addr::new(10, 0, 0, 1).into(),
			dst: Ipv4Addr::new(10, 0, 0, 2).into(),
		};

		let sum = Checksum::of(bytes::as_slice(&header)).end();
		header.checksum = u16be::new(u16::from_ne_bytes(sum));

		assert_eq!(Checksum::of(bytes::as_slice(&header)).end(), [0, 0]);
	}
}
