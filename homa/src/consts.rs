//! Canonical Homa transport constants (spec §4.5/§4.7/§4.8), taken
//! verbatim from the original program's `#define`s.

/// Servers in the canonical configuration.
pub const SERVERNUM: usize = 4;

/// Bandwidth-delay product, in bytes: how much a flow may send before any GRANT.
pub const RTT_BYTES: u32 = 20_000;

/// Per-tick cap on grant-request retransmissions walked from the request-outstanding set.
pub const MAX_REQUEST_RETRANSMIT_ONE_TIME: usize = 16;

/// Seconds since `last_grant_request_sent_time` before a grant request is considered stalled.
pub const RETRANSMIT_TIMEOUT: f64 = 0.01;

/// Priority levels assigned to the unscheduled (RTT-bytes) burst, by flow size.
pub const UNSCHEDULED_PRIORITY: usize = 6;

/// Priority levels the receiver assigns per tick to its smallest-remain active flows.
pub const SCHEDULED_PRIORITY: usize = 2;

/// Capacity of every bounded active-set slot array.
pub const MAX_CONCURRENT_FLOW: usize = 100;

/// Ascending flow-size cut-offs mapping a flow to one of `UNSCHEDULED_PRIORITY` levels.
pub const PRIO_CUT_OFF_BYTES: [u32; UNSCHEDULED_PRIORITY - 1] = [2000, 4000, 6000, 8000, 10000];

/// Priority level for scheduled-grant slot `i`.
pub const PRIO_MAP: [u8; 8] = [0, 1, 2, 3, 4, 5, 6, 7];

/// Hard wall-clock deadline for the main poll loop.
pub const DEADLINE_SECS: f64 = 40.0;
