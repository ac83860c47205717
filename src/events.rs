/// Event dispatch: forwarding local `HostEvent`s to an upstream delegate.
///
/// The host table and gossip engine never call an upstream layer
/// directly; they hand events to a `HostEventDispatcher`, which is the
/// out-of-scope "delegate" the design names. `BroadcastDispatcher` is the
/// concrete implementation used by `HostMeshEngine`, built on
/// `tokio::sync::broadcast` the way the rest of this codebase wires up
/// pub/sub.
use crate::types::HostEvent;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default capacity for the broadcast channel's internal ring buffer.
/// A lagging subscriber drops the oldest events rather than block a
/// sender; see `HostEventDispatcher::dispatch`'s doc comment.
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Receives local `HostEvent`s as they are emitted.
///
/// Invoked only for real state transitions (§8, invariant 6): a no-op
/// update never reaches this trait.
pub trait HostEventDispatcher: Send + Sync {
    fn dispatch(&self, event: HostEvent);
}

/// A subscription handle returned by `BroadcastDispatcher::subscribe`.
pub struct HostEventSubscription {
    receiver: broadcast::Receiver<Arc<HostEvent>>,
}

impl HostEventSubscription {
    /// Await the next event. Returns `None` once the dispatcher itself has
    /// been dropped and no further events will ever arrive.
    pub async fn recv(&mut self) -> Option<Arc<HostEvent>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "host event subscriber lagged, events dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// The default dispatcher: a broadcast channel any number of subscribers
/// can listen on. A handler that throws has no analogue here — dispatch
/// is infallible by construction, so the "handler exception" error case
/// in the design only applies to subscribers processing what they
/// receive, not to dispatch itself.
pub struct BroadcastDispatcher {
    sender: broadcast::Sender<Arc<HostEvent>>,
}

impl BroadcastDispatcher {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> HostEventSubscription {
        HostEventSubscription {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for BroadcastDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HostEventDispatcher for BroadcastDispatcher {
    fn dispatch(&self, event: HostEvent) {
        // No receivers is the common case in tests and single-shot
        // demos; `send` returning an error just means nobody is
        // listening right now, which is not a failure worth logging.
        let _ = self.sender.send(Arc::new(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConnectPoint, HostEventKind, MacAddress, ProviderId, VlanId};
    use std::collections::{HashMap, HashSet};

    fn sample_event(kind: HostEventKind) -> HostEvent {
        HostEvent {
            kind,
            subject: crate::types::Host {
                provider_id: ProviderId::new("test", "p1"),
                id: crate::types::HostId::new("aa:bb:cc:dd:ee:ff", 10),
                mac: MacAddress::parse("aa:bb:cc:dd:ee:ff").unwrap(),
                vlan: VlanId(10),
                location: ConnectPoint::new("of:1", 1),
                ip_addresses: HashSet::new(),
                annotations: HashMap::new(),
            },
            previous_location: None,
        }
    }

    #[tokio::test]
    async fn subscribers_receive_dispatched_events() {
        let dispatcher = BroadcastDispatcher::new();
        let mut sub = dispatcher.subscribe();

        dispatcher.dispatch(sample_event(HostEventKind::Added));
        let received = sub.recv().await.unwrap();
        assert_eq!(received.kind, HostEventKind::Added);
    }

    #[tokio::test]
    async fn dispatch_with_no_subscribers_does_not_panic() {
        let dispatcher = BroadcastDispatcher::new();
        dispatcher.dispatch(sample_event(HostEventKind::Removed));
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_their_own_copy() {
        let dispatcher = BroadcastDispatcher::new();
        let mut sub1 = dispatcher.subscribe();
        let mut sub2 = dispatcher.subscribe();

        dispatcher.dispatch(sample_event(HostEventKind::Moved));

        assert_eq!(sub1.recv().await.unwrap().kind, HostEventKind::Moved);
        assert_eq!(sub2.recv().await.unwrap().kind, HostEventKind::Moved);
    }
}
