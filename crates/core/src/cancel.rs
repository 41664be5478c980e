//! Cancellation linking.
//!
//! A run is stopped either by its caller or by the component that owns it.
//! [`LinkedToken`] merges any number of source tokens into one token that
//! fires when the first source fires, and can also be cancelled directly.
//! The controller and every per-tool-call scope use it the same way.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A token cancelled when any of its sources is cancelled.
///
/// Forwarding tasks are aborted on drop, so a linked token never outlives
/// its scope. Must be created inside a tokio runtime.
#[derive(Debug)]
pub struct LinkedToken {
    token: CancellationToken,
    forwarders: Vec<JoinHandle<()>>,
}

impl LinkedToken {
    pub fn new<I>(sources: I) -> Self
    where
        I: IntoIterator<Item = CancellationToken>,
    {
        let token = CancellationToken::new();
        let mut forwarders = Vec::new();

        for source in sources {
            if source.is_cancelled() {
                token.cancel();
                continue;
            }
            let linked = token.clone();
            forwarders.push(tokio::spawn(async move {
                tokio::select! {
                    _ = source.cancelled() => linked.cancel(),
                    _ = linked.cancelled() => {}
                }
            }));
        }

        Self { token, forwarders }
    }

    /// Link one external source with a fresh, internally owned token.
    pub fn with_owned(external: &CancellationToken) -> (Self, CancellationToken) {
        let owned = CancellationToken::new();
        let linked = Self::new([external.clone(), owned.clone()]);
        (linked, owned)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for LinkedToken {
    fn drop(&mut self) {
        for handle in &self.forwarders {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fires_when_any_source_fires() {
        let external = CancellationToken::new();
        let (linked, owned) = LinkedToken::with_owned(&external);
        assert!(!linked.is_cancelled());

        owned.cancel();
        linked.token().cancelled().await;
        assert!(linked.is_cancelled());
        assert!(!external.is_cancelled());
    }

    #[tokio::test]
    async fn external_cancellation_propagates() {
        let external = CancellationToken::new();
        let (linked, _owned) = LinkedToken::with_owned(&external);
        external.cancel();
        linked.token().cancelled().await;
        assert!(linked.is_cancelled());
    }

    #[tokio::test]
    async fn already_cancelled_source_cancels_immediately() {
        let source = CancellationToken::new();
        source.cancel();
        let linked = LinkedToken::new([source]);
        assert!(linked.is_cancelled());
    }

    #[tokio::test]
    async fn cancelling_linked_does_not_touch_sources() {
        let a = CancellationToken::new();
        let b = CancellationToken::new();
        let linked = LinkedToken::new([a.clone(), b.clone()]);
        linked.cancel();
        linked.cancel();
        assert!(linked.is_cancelled());
        assert!(!a.is_cancelled());
        assert!(!b.is_cancelled());
    }
}
