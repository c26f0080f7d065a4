//! The three text-file loaders (spec §4.2 / §4.3 / §6): MAC addresses, IPv4
//! addresses, and flow descriptors. A missing file or a malformed line is
//! logged and skipped -- loading always continues best-effort with whatever
//! was parsed, matching spec §7's Configuration error taxonomy.

use core::net::Ipv4Addr;
use std::fs;
use std::path::Path;

use log::{debug, trace, warn};
use net::eth::MacAddr;

use crate::directory::Directory;
use crate::flow::{Flow, Table};

fn read_lines(path: &Path) -> Vec<String> {
	match fs::read_to_string(path) {
		Ok(contents) => contents.lines().map(str::to_owned).collect(),
		Err(err) => {
			warn!("{}: no such file ({err})", path.display());
			Vec::new()
		}
	}
}

fn parse_fields<const N: usize>(line: &str) -> Option<[u64; N]> {
	let mut fields = line.split_whitespace().map(str::parse::<u64>);
	let mut out = [0u64; N];

	for slot in &mut out {
		*slot = fields.next()?.ok()?;
	}

	fields.next().is_none().then_some(out)
}

/// Loads `eth_addr_info.txt`: one `b0 b1 b2 b3 b4 b5` line per server, server
/// id given by line order.
pub fn load_eth_addr_info(path: &Path, directory: &mut Directory) {
	for (server_id, line) in read_lines(path).iter().enumerate() {
		let Some(bytes) = parse_fields::<6>(line) else {
			warn!("{}:{}: malformed MAC address line {line:?}", path.display(), server_id + 1);
			continue;
		};

		let octets = bytes.map(|b| b as u8);
		directory.set_mac(server_id, MacAddr::new(octets));
		debug!("server {server_id} eth={}", MacAddr::new(octets));
	}
}

/// Loads `ip_addr_info.txt`: one `a b c d` line per server, server id given
/// by line order.
pub fn load_ip_addr_info(path: &Path, directory: &mut Directory) {
	for (server_id, line) in read_lines(path).iter().enumerate() {
		let Some([a, b, c, d]) = parse_fields::<4>(line) else {
			warn!("{}:{}: malformed IP address line {line:?}", path.display(), server_id + 1);
			continue;
		};

		let ip = Ipv4Addr::new(a as u8, b as u8, c as u8, d as u8);
		directory.set_ip(server_id, ip);
		debug!("server {server_id} ip={ip}");
	}
}

/// Loads `flow_info.txt`: `flow_id src_a src_b src_c src_d dst_a dst_b
/// dst_c dst_d src_port dst_port flow_size start_time` per line (spec §4.3).
/// Returns the populated table plus the count of flows whose src IP maps to
/// `local_server_id` (`sender_total_flow_num`).
pub fn load_flow_info(path: &Path, total_flow_num: usize, local_server_id: usize, directory: &Directory) -> (Table, usize) {
	let mut table = Table::with_capacity(total_flow_num);
	let mut sender_total_flow_num = 0;

	for (lineno, line) in read_lines(path).iter().enumerate() {
		let mut fields = line.split_whitespace();

		let parsed = (|| {
			let flow_id: usize = fields.next()?.parse().ok()?;
			let src: [u8; 4] = [
				fields.next()?.parse().ok()?,
				fields.next()?.parse().ok()?,
				fields.next()?.parse().ok()?,
				fields.next()?.parse().ok()?,
			];
			let dst: [u8; 4] = [
				fields.next()?.parse().ok()?,
				fields.next()?.parse().ok()?,
				fields.next()?.parse().ok()?,
				fields.next()?.parse().ok()?,
			];
			let src_port: u16 = fields.next()?.parse().ok()?;
			let dst_port: u16 = fields.next()?.parse().ok()?;
			let flow_size: u32 = fields.next()?.parse().ok()?;
			let start_time: f64 = fields.next()?.parse().ok()?;

			if fields.next().is_some() {
				return None;
			}

			Some((flow_id, src, dst, src_port, dst_port, flow_size, start_time))
		})();

		let Some((flow_id, src, dst, src_port, dst_port, flow_size, start_time)) = parsed else {
			warn!("{}:{}: malformed flow line {line:?}", path.display(), lineno + 1);
			continue;
		};

		let Some(slot) = table.sender.get_mut(flow_id) else {
			warn!("{}:{}: flow id {flow_id} exceeds configured flow table size {total_flow_num}", path.display(), lineno + 1);
			continue;
		};

		let src_ip = Ipv4Addr::from(src);
		let dst_ip = Ipv4Addr::from(dst);

		*slot = Flow::from_config(src_ip, dst_ip, src_port, dst_port, flow_size, start_time);

		if directory.server_id_of(src_ip) == Some(local_server_id) {
			sender_total_flow_num += 1;
		}

		trace!("flow {flow_id}: {src_ip}:{src_port} -> {dst_ip}:{dst_port}, {flow_size}B @ {start_time}");
	}

	(table, sender_total_flow_num)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn missing_files_yield_empty_directory_without_panicking() {
		let mut directory = Directory::new();
		load_eth_addr_info(Path::new("/nonexistent/eth_addr_info.txt"), &mut directory);
		load_ip_addr_info(Path::new("/nonexistent/ip_addr_info.txt"), &mut directory);
		assert_eq!(directory.server_count(), 0);
	}

	#[test]
	fn malformed_lines_are_skipped_not_fatal() {
		let mut directory = Directory::new();
		let dir = std::env::temp_dir().join("homa_config_test_eth.txt");
		fs::write(&dir, "0 1 2 3 4 5\nnot a mac\n10 20 30 40 50 60\n").unwrap();

		load_eth_addr_info(&dir, &mut directory);

		assert_eq!(directory.mac(0), Some(MacAddr::new([0, 1, 2, 3, 4, 5])));
		// the malformed second line occupies server id 1 and is skipped
		assert_eq!(directory.mac(1), None);
		assert_eq!(directory.mac(2), Some(MacAddr::new([10, 20, 30, 40, 50, 60])));

		fs::remove_file(&dir).ok();
	}

	#[test]
	fn flow_line_populates_sender_table_and_counts_local_flows() {
		let mut directory = Directory::new();
		directory.set_ip(0, Ipv4Addr::new(10, 0, 0, 1));
		directory.set_ip(1, Ipv4Addr::new(10, 0, 0, 2));

		let path = std::env::temp_dir().join("homa_config_test_flow.txt");
		fs::write(&path, "0 10 0 0 1 10 0 0 2 1000 2000 1500 0.0\n").unwrap();

		let (table, sender_total) = load_flow_info(&path, 1, 0, &directory);

		assert_eq!(sender_total, 1);
		assert_eq!(table.sender[0].flow_size, 1500);
		assert_eq!(table.sender[0].dst_port, 2000);

		fs::remove_file(&path).ok();
	}
}
