/// ─── Mixcoin Protocol Constants ─────────────────────────────────────────────
///
/// Defaults for the confirmation window, chunk sizing and timing. All of
/// these are operator policy knobs overridable from the daemon flags; none
/// are consensus constants.
use crate::types::Amount;

// ── Confirmation window ──────────────────────────────────────────────────────

/// Minimum confirmations before a deposit is harvested.
pub const DEFAULT_MIN_CONFIRMATIONS: u32 = 6;

/// Upper confirmation bound. Deposits older than this are treated as stale
/// and never harvested. Policy knob, not a protocol constant.
pub const DEFAULT_MAX_CONFIRMATIONS: u32 = 9999;

// ── Chunk sizing ─────────────────────────────────────────────────────────────

/// Standard chunk denomination in satoshi (0.1 BTC). Deposits below this are
/// ignored at harvest time.
pub const DEFAULT_CHUNK_SIZE: Amount = 10_000_000;

/// Fee rates are expressed in basis points; values above this are clamped.
pub const FEE_BIPS_MAX: u16 = 10_000;

// ── Timing ───────────────────────────────────────────────────────────────────

/// Wall-clock approximation of one block, used to convert release delays
/// drawn in height-units into sleep durations.
pub const DEFAULT_BLOCK_UNIT_SECS: u64 = 600;

// ── RPC retry policy ─────────────────────────────────────────────────────────

pub const RPC_RETRY_ATTEMPTS: u32 = 5;
pub const RPC_RETRY_BASE_MS: u64 = 500;
