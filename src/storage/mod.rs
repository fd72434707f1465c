//! Persistence for the long-term tier
//!
//! Only long-term item records persist; the immediate and session tiers are
//! in-memory by design.

mod records;

pub use records::{RecordStore, RecordStoreConfig};
