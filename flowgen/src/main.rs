//! Command-line driver for the Homa transport core: loads a static flow
//! configuration and runs two configured servers against each other over an
//! in-process loopback pair, printing each completed flow's FCT to stdout.
//!
//! There is no real NIC/DPDK binding in this project (out of scope, per the
//! packet-I/O plane contract) -- this binary exists to exercise the engine
//! end-to-end against a config directory shaped like the original program's.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use homa::{config, consts, directory::Directory, flow::Table, Engine, Policy};
use log::LevelFilter;
use runtime::clock::Clock;
use runtime::port::loopback;

/// Runs a two-server Homa transport simulation from a static flow configuration.
#[derive(Parser)]
struct Cli {
	/// Directory containing eth_addr_info.txt, ip_addr_info.txt and flow_info.txt.
	#[arg(long, default_value = "config")]
	config_dir: PathBuf,

	/// Total number of flows described by flow_info.txt.
	#[arg(long, default_value_t = 4)]
	total_flow_num: usize,

	/// Server id acting as the flow-generating side (sends according to flow_info.txt).
	#[arg(long, default_value_t = 0)]
	server_a: usize,

	/// Server id acting as the counterpart (receives whatever server-a sends it).
	#[arg(long, default_value_t = 1)]
	server_b: usize,

	/// Hard wall-clock deadline for the run, in seconds.
	#[arg(long, default_value_t = consts::DEADLINE_SECS)]
	deadline_secs: f64,

	/// Skip the two calibration sleeps (useful for tests/CI).
	#[arg(long)]
	no_calibration: bool,

	/// Increase log verbosity (-v, -vv, -vvv).
	#[arg(short, long, action = clap::ArgAction::Count)]
	verbose: u8,
}

fn init_logger(verbose: u8) {
	let level = match verbose {
		0 => LevelFilter::Warn,
		1 => LevelFilter::Info,
		2 => LevelFilter::Debug,
		_ => LevelFilter::Trace,
	};

	log::set_boxed_logger(Box::new(runtime::Logger)).expect("logger already installed");
	log::set_max_level(level);
}

fn load_directory(config_dir: &std::path::Path) -> Directory {
	let mut directory = Directory::new();
	config::load_eth_addr_info(&config_dir.join("eth_addr_info.txt"), &mut directory);
	config::load_ip_addr_info(&config_dir.join("ip_addr_info.txt"), &mut directory);
	directory
}

fn main() {
	let cli = Cli::parse();
	init_logger(cli.verbose);

	let directory = load_directory(&cli.config_dir);
	let (sender_table, sender_total_flow_num) = config::load_flow_info(&cli.config_dir.join("flow_info.txt"), cli.total_flow_num, cli.server_a, &directory);
	let receiver_table = Table::with_capacity(cli.total_flow_num);

	let (port_a, port_b) = loopback::pair();

	let calibration_delay = if cli.no_calibration { Duration::from_millis(0) } else { Duration::from_secs(2) };
	let policy = Policy { calibration_delay, deadline_secs: cli.deadline_secs, ..Policy::default() };

	let mut server_a = Engine::new(port_a, directory.clone(), cli.server_a, sender_table, sender_total_flow_num, policy.clone());
	let mut server_b = Engine::new(port_b, directory, cli.server_b, receiver_table, 0, policy);

	Clock::sleep(calibration_delay);
	Clock::sleep(calibration_delay);

	let deadline = Instant::now() + Duration::from_secs_f64(cli.deadline_secs);

	loop {
		server_a.step();
		server_b.step();

		if (server_a.drained() && server_b.drained()) || Instant::now() >= deadline {
			break;
		}
	}
}
