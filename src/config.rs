//! Decoder configuration.
//!
//! An immutable options object passed at open time. The legacy decoders
//! steered verbosity and validation through shared mutable flags; here the
//! knobs are explicit and fixed for the lifetime of a decoder instance,
//! and verbosity belongs to the tracing subscriber.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Options fixed at `Decoder::open` time.
#[derive(Debug, Clone, Default)]
pub struct DecoderOptions {
    /// Abort the scan on the first record decode error instead of skipping
    /// and counting, and make per-record read failures fatal instead of
    /// substituting missing values.
    pub fail_fast: bool,

    /// Require every scanned record's category set to be covered by the
    /// schema derived from the first record. The faithful default leaves
    /// uncovered categories silently invisible.
    pub strict_categories: bool,

    /// Cooperative cancellation, checked between records during the scan.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl DecoderOptions {
    pub fn fail_fast(mut self, yes: bool) -> Self {
        self.fail_fast = yes;
        self
    }

    pub fn strict_categories(mut self, yes: bool) -> Self {
        self.strict_categories = yes;
        self
    }

    pub fn cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|f| f.load(std::sync::atomic::Ordering::Relaxed))
    }
}
