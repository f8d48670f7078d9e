//! Shared types for TimedKV: error kinds, RPC return codes, the parameter-map
//! wire codec, and deadline normalization. Everything here is pure and
//! synchronous so it can be depended on by the store, the RPC layer, the
//! server binary, and the client without pulling in any particular runtime.

pub mod constants;
pub mod deadline;
pub mod error;
pub mod paramcodec;
pub mod rpc;

pub use constants::*;
pub use deadline::{is_expired, normalize_xt, remaining};
pub use error::{Result, TimedKvError};
pub use paramcodec::{
    choose_encoding, decode_form, decode_tsv, encode_form, encode_tsv, get_str, insert_bytes, insert_str, ColEnc,
    ParamMap,
};
pub use rpc::{reason_phrase, ReturnCode};

use serde::{Deserialize, Serialize};

/// One logical database's identity within a multi-database server: its
/// configured name (used by RPC's `DB` parameter) and its backing path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSpec {
    pub name: String,
    /// Backing path, or `None` for an in-memory-only database.
    pub path: Option<String>,
    pub persistent: bool,
    pub max_count: Option<u64>,
    pub max_size: Option<u64>,
}
