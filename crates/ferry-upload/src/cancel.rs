//! Composable cancellation.
//!
//! A [`CancellationToken`] is either a root (cancelled explicitly, or by its
//! own deadline) or a combination of other tokens. A combined token is
//! cancelled as soon as any input is, and reports the reason of whichever
//! input fired first.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, select_all};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken as Signal;

/// Why a token fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// [`CancellationToken::cancel`] was called.
    Requested,
    /// The token's deadline passed.
    TimedOut,
}

#[derive(Debug, Clone, Copy)]
struct Fired {
    at: Instant,
    reason: CancelReason,
}

#[derive(Debug)]
struct Node {
    signal: Signal,
    fired: OnceLock<Fired>,
    deadline: Option<Instant>,
    parents: Vec<CancellationToken>,
}

/// Cheaply cloneable, observable cancellation flag.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    node: Arc<Node>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::build(None, Vec::new())
    }

    /// A token that cancels itself once `after` has elapsed.
    pub fn with_timeout(after: Duration) -> Self {
        Self::build(Some(Instant::now() + after), Vec::new())
    }

    /// A token cancelled as soon as any of `tokens` is (first cancel wins).
    pub fn any<'a>(tokens: impl IntoIterator<Item = &'a CancellationToken>) -> Self {
        Self::build(None, tokens.into_iter().cloned().collect())
    }

    /// Combines this token with a fresh timeout token.
    pub fn child_with_timeout(&self, after: Duration) -> Self {
        Self::any([self, &Self::with_timeout(after)])
    }

    fn build(deadline: Option<Instant>, parents: Vec<CancellationToken>) -> Self {
        Self {
            node: Arc::new(Node {
                signal: Signal::new(),
                fired: OnceLock::new(),
                deadline,
                parents,
            }),
        }
    }

    /// Cancels this token and everything derived from it. Later calls are no-ops.
    pub fn cancel(&self) {
        self.fire(Fired {
            at: Instant::now(),
            reason: CancelReason::Requested,
        });
    }

    fn fire(&self, fired: Fired) {
        let _ = self.node.fired.set(fired);
        self.node.signal.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.fired().is_some()
    }

    /// Reason of the earliest cancellation among this token and its inputs.
    pub fn reason(&self) -> Option<CancelReason> {
        self.fired().map(|f| f.reason)
    }

    fn fired(&self) -> Option<Fired> {
        let own = self.node.fired.get().copied().or_else(|| {
            let deadline = self.node.deadline?;
            if Instant::now() < deadline {
                return None;
            }
            let fired = Fired {
                at: deadline,
                reason: CancelReason::TimedOut,
            };
            self.fire(fired);
            self.node.fired.get().copied()
        });

        self.node
            .parents
            .iter()
            .filter_map(CancellationToken::fired)
            .chain(own)
            .min_by_key(|f| f.at)
    }

    /// Resolves once the token is cancelled.
    pub fn cancelled(&self) -> BoxFuture<'_, ()> {
        async move {
            if self.is_cancelled() {
                return;
            }

            let mut waits: Vec<BoxFuture<'_, ()>> = Vec::with_capacity(self.node.parents.len() + 2);
            waits.push(self.node.signal.cancelled().boxed());
            if let Some(deadline) = self.node.deadline {
                waits.push(tokio::time::sleep_until(deadline).boxed());
            }
            for parent in &self.node.parents {
                waits.push(parent.cancelled());
            }
            select_all(waits).await;

            // Record the deadline if that is what woke us.
            let _ = self.fired();
        }
        .boxed()
    }
}
