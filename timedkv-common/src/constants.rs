/// Largest key this core will accept in an RPC parameter.
pub const MAX_KEY_SIZE: usize = 4096;

/// Largest value this core will accept in an RPC parameter.
pub const MAX_VALUE_SIZE: usize = 64 * 1024 * 1024;

/// Hard cap on an HTTP request body; bodies larger than this are rejected
/// with 413 before they are fully read.
pub const MAX_BODY_SIZE: u64 = 1 << 30;

/// Largest representable expiration deadline: the 5-byte big-endian prefix
/// this core stamps on every non-persistent record tops out at `2^40 - 1`.
pub const DEADLINE_MAX: u64 = (1u64 << 40) - 1;

/// Caller-supplied `xt` values at or below this (and positive) are treated
/// as "seconds from now" rather than an absolute epoch second.
pub const XT_RELATIVE_SENTINEL: i64 = 1 << 62;

/// How many units the expiration-score accumulator gains per write.
pub const SWEEP_UNIT: u64 = 256;

/// Readers contribute `SWEEP_UNIT / SWEEP_READ_FACTOR` per operation.
pub const SWEEP_READ_FACTOR: u64 = 8;

/// `iterate` contributes `SWEEP_UNIT * record_count / SWEEP_ITER_FACTOR`.
pub const SWEEP_ITER_FACTOR: u64 = 512;

/// The accumulator triggers a sweep attempt once it reaches `SWEEP_UNIT * SWEEP_BATCH`.
pub const SWEEP_BATCH: u64 = 8;
