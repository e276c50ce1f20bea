//! Change-event subscriptions for watched resources

use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::debug;

use mirrorguard_common::Error;

/// A change observed on a watched resource
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceEvent<T> {
    /// The resource was first seen (initial listing or creation)
    Added(T),
    /// The resource changed
    Modified(T),
    /// The resource was removed
    Deleted(T),
}

impl<T> ResourceEvent<T> {
    /// The state carried by the event
    pub fn state(&self) -> &T {
        match self {
            ResourceEvent::Added(s) | ResourceEvent::Modified(s) | ResourceEvent::Deleted(s) => s,
        }
    }
}

/// Event stream for one resource
///
/// Owns the underlying watch. Releasing it (explicitly or on drop) closes the
/// stream and stops any server-side watch behind it.
pub struct Subscription<T> {
    resource: String,
    events: Option<BoxStream<'static, Result<ResourceEvent<T>, Error>>>,
}

impl<T> Subscription<T> {
    /// Wrap an event stream for `resource` (e.g., "cluster/c-abc12")
    pub fn new(
        resource: impl Into<String>,
        events: BoxStream<'static, Result<ResourceEvent<T>, Error>>,
    ) -> Self {
        Self {
            resource: resource.into(),
            events: Some(events),
        }
    }

    /// Identifier of the watched resource
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Next event, or `None` once the stream is closed or released
    pub async fn next(&mut self) -> Option<Result<ResourceEvent<T>, Error>> {
        match self.events.as_mut() {
            Some(events) => events.next().await,
            None => None,
        }
    }

    /// Close the stream. Idempotent.
    pub fn release(&mut self) {
        if self.events.take().is_some() {
            debug!(resource = %self.resource, "Released watch subscription");
        }
    }

    /// Whether the stream has been released
    pub fn is_released(&self) -> bool {
        self.events.is_none()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("resource", &self.resource)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn test_next_yields_events_in_order() {
        let events = stream::iter(vec![
            Ok(ResourceEvent::Added(1)),
            Ok(ResourceEvent::Modified(2)),
        ])
        .boxed();
        let mut sub = Subscription::new("cluster/c-1", events);

        assert_eq!(sub.next().await.unwrap().unwrap(), ResourceEvent::Added(1));
        assert_eq!(
            sub.next().await.unwrap().unwrap(),
            ResourceEvent::Modified(2)
        );
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_release_closes_stream() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Result<ResourceEvent<u8>, Error>>();
        let events = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();
        let mut sub = Subscription::new("cluster/c-1", events);
        assert!(!tx.is_closed());

        sub.release();
        assert!(sub.is_released());
        assert!(tx.is_closed());
        assert!(sub.next().await.is_none());

        // Releasing twice is fine
        sub.release();
    }

    #[tokio::test]
    async fn test_drop_releases_stream() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Result<ResourceEvent<u8>, Error>>();
        let events = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();
        let sub = Subscription::new("cluster/c-1", events);
        drop(sub);
        assert!(tx.is_closed());
    }

    #[test]
    fn test_event_state_accessor() {
        assert_eq!(*ResourceEvent::Deleted("x").state(), "x");
    }
}
