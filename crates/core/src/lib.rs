//! Core domain types and traits for the Lens observability backend.
//!
//! Everything the other crates share lives here: the span/trace/project/user
//! data model, the error taxonomy, pagination, and the [`store::Store`]
//! trait that the storage backends implement.

pub mod error;
pub mod page;
pub mod project;
pub mod span;
pub mod store;
pub mod trace;
pub mod user;

pub use error::{Error, Result, StoreError};
pub use page::{Page, PageRequest};
pub use project::Project;
pub use span::{Span, SpanStatus, SpanSubType, SpanType, ToolUse};
pub use store::Store;
pub use trace::{Trace, TraceMetrics, TraceStatus, TraceWithMetrics, TraceWithSpans};
pub use user::User;

/// Generate a fresh opaque identifier (hyphen-free UUIDv4).
///
/// Client-supplied ids are always preserved verbatim; this is only used
/// when the SDK omits one.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_id_is_opaque_and_unique() {
        let a = new_id();
        let b = new_id();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
        assert!(!a.contains('-'));
    }
}
