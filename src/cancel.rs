//! Cooperative cancellation.
//!
//! Decoding one file is a synchronous forward pass with no suspension
//! points, so cancellation is checked between segments: the external job
//! scheduler flips the token and the pipeline aborts at the next segment
//! boundary with [`DecodeError::Cancelled`](crate::DecodeError::Cancelled).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cheaply cloneable cancellation flag shared between a decode
/// invocation and whoever supervises it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// A fresh, untriggered token.
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    /// Request cancellation.  The decode aborts at its next segment
    /// boundary.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Has cancellation been requested?
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[test]
fn cancel_token_is_shared_between_clones() {
    let token = CancelToken::new();
    let clone = token.clone();
    assert!(!clone.is_cancelled());
    token.cancel();
    assert!(clone.is_cancelled());
}
