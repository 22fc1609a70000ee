//! Critical-suggestion tunnel.
//!
//! Reviewers produce a stream of suggestions, most of which are noise
//! (style, micro-optimizations). The tunnel keeps only what can break
//! something and hands it downstream in batches:
//!
//! ```text
//! suggestions ─▸ CriticalFilter ─▸ survivors ─▸ Bin (open → processing)
//!                                                   │
//!                                   dispatch callback ├─ ok  ─▸ dispatched
//!                                                   └─ err ─▸ error (re-raised)
//! ```

pub mod filter;
pub mod router;
pub mod types;

#[allow(unused_imports)]
pub use filter::{CriticalFilter, Rejection};
#[allow(unused_imports)]
pub use router::{DispatchCallback, Tunnel};
#[allow(unused_imports)]
pub use types::{
    Bin, BinStatus, Category, Channel, IngestResult, IngestStatus, RawSuggestion, Severity,
    SeverityBreakdown, Suggestion,
};
