//! Cooperative cancellation tokens.
//!
//! The scheduler needs a token tree: cancelling the run
//! root must cancel every in-flight check transitively, and a per-check
//! timeout must cancel only that check's subtree. Built on
//! `tokio::sync::watch`, which already gives us "last write wins" broadcast
//! to all clones cheaply.

use tokio::sync::watch;

#[derive(Clone)]
pub struct CancellationToken {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// Create a child token: cancelling the child does not cancel the
    /// parent, but cancelling the parent cancels the child.
    pub fn child_token(&self) -> Self {
        let child = Self::new();
        let mut parent_rx = self.rx.clone();
        let child_tx = child.tx.clone();
        if *parent_rx.borrow() {
            let _ = child_tx.send(true);
            return child;
        }
        tokio::spawn(async move {
            loop {
                if parent_rx.changed().await.is_err() {
                    return;
                }
                if *parent_rx.borrow() {
                    let _ = child_tx.send(true);
                    return;
                }
            }
        });
        child
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once this token (or an ancestor) is cancelled. Intended to
    /// be used in a `tokio::select!` alongside provider I/O, so providers
    /// observe the cancellation signal at known suspension points rather
    /// than running to completion regardless.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_marks_token_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn parent_cancel_propagates_to_child() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        parent.cancel();
        tokio::time::timeout(Duration::from_secs(1), child.cancelled())
            .await
            .expect("child should observe cancellation");
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn child_cancel_does_not_affect_parent() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        child.cancel();
        assert!(!parent.is_cancelled());
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn already_cancelled_parent_yields_cancelled_child() {
        let parent = CancellationToken::new();
        parent.cancel();
        let child = parent.child_token();
        tokio::time::timeout(Duration::from_secs(1), child.cancelled())
            .await
            .expect("child spawned from a cancelled parent should be cancelled");
    }
}
