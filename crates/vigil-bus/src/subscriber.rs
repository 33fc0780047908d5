//! Subscriber contract

use vigil_core::Event;

use crate::error::SubscriberError;

/// Receives fully populated events from the bus.
///
/// Runs on the bus worker pool. Errors and panics are caught and logged by the
/// bus; a subscriber is never retried for the same event.
pub trait Subscriber: Send + Sync + 'static {
    fn name(&self) -> &str {
        "anonymous"
    }

    fn on_event(&self, event: &Event) -> Result<(), SubscriberError>;
}

/// Adapter turning a closure into a [`Subscriber`].
pub struct FnSubscriber<F> {
    name: String,
    callback: F,
}

impl<F> Subscriber for FnSubscriber<F>
where
    F: Fn(&Event) -> Result<(), SubscriberError> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_event(&self, event: &Event) -> Result<(), SubscriberError> {
        (self.callback)(event)
    }
}

/// Wrap a closure as a named subscriber.
pub fn from_fn<F>(name: impl Into<String>, callback: F) -> FnSubscriber<F>
where
    F: Fn(&Event) -> Result<(), SubscriberError> + Send + Sync + 'static,
{
    FnSubscriber {
        name: name.into(),
        callback,
    }
}
