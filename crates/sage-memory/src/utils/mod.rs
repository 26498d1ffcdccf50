//! Memory Utilities
//!
//! Common helpers shared by the store, index and persistence layers.

mod hashing;
mod lock;
mod time;

pub use hashing::{content_hash, feature_hash};
pub(crate) use lock::{lock, read_lock, write_lock};
pub use time::{format_datetime, now_utc, parse_datetime};
