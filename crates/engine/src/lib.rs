//! Read-side derivation for Lens: span trees and trace rollups.
//!
//! Both are recomputed per request from the persisted span set; nothing in
//! this crate writes to a store.

pub mod rollup;
pub mod tree;

pub use rollup::trace_metrics;
pub use tree::{NodeRollup, SpanNode, build_tree};
