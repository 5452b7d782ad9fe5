//! Fan-out hub: a single actor loop that owns the subscriber
//! registry, eliminating the need for explicit locks. Subscriber
//! registration, removal, and publish all funnel through one inbox
//! channel.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

const SUBSCRIBER_CHANNEL_CAPACITY: usize = 32;
const INBOX_CAPACITY: usize = 1;

/// Supplies the current state to a subscriber at the moment it
/// joins, so it sees the initial snapshot plus subsequent publishes.
pub type OnJoin = Box<dyn Fn() -> Result<Option<Bytes>, String> + Send + Sync>;

enum Command {
    Subscribe(oneshot::Sender<Subscription>),
    Publish(Bytes),
    Close(u64),
}

/// A handle to the hub. Cloning it is cheap; every clone shares the
/// same inbox.
#[derive(Clone)]
pub struct FanoutHub {
    inbox: mpsc::Sender<Command>,
}

/// An active subscriber's receiving end.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Bytes>,
    inbox: mpsc::Sender<Command>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Idempotent removal; best-effort since Drop can't await.
        let _ = self.inbox.try_send(Command::Close(self.id));
    }
}

impl FanoutHub {
    /// Spawn the hub loop and return a handle. `on_join` is invoked
    /// once per subscription, immediately after registration.
    pub fn spawn(on_join: OnJoin) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        tokio::spawn(run(inbox_rx, inbox_tx.clone(), on_join));
        Self { inbox: inbox_tx }
    }

    /// Register a new subscriber. Blocks only on the bounded inbox,
    /// not on fan-out delivery.
    pub async fn subscribe(&self) -> Option<Subscription> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inbox.send(Command::Subscribe(reply_tx)).await.ok()?;
        reply_rx.await.ok()
    }

    /// Publish a payload to every current subscriber, in registration
    /// order. Non-blocking from the producer's perspective beyond the
    /// size-1 inbox.
    pub async fn publish(&self, payload: Bytes) {
        if self.inbox.send(Command::Publish(payload)).await.is_err() {
            warn!("fan-out hub inbox closed, dropping publish");
        }
    }
}

async fn run(mut inbox: mpsc::Receiver<Command>, self_tx: mpsc::Sender<Command>, on_join: OnJoin) {
    let mut subscribers: HashMap<u64, mpsc::Sender<Bytes>> = HashMap::new();
    let mut next_id: u64 = 0;

    while let Some(command) = inbox.recv().await {
        match command {
            Command::Subscribe(reply) => {
                let id = next_id;
                next_id += 1;

                let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
                match on_join() {
                    Ok(Some(initial)) => {
                        if tx.send(initial).await.is_err() {
                            warn!(subscriber = id, "subscriber closed before initial state was delivered");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(subscriber = id, error = %e, "onJoin callback failed"),
                }

                subscribers.insert(id, tx);
                debug!(subscriber = id, total = subscribers.len(), "subscriber joined");

                if reply
                    .send(Subscription {
                        id,
                        rx,
                        inbox: self_tx.clone(),
                    })
                    .is_err()
                {
                    // Requester went away before the reply arrived.
                    subscribers.remove(&id);
                }
            }
            Command::Publish(payload) => {
                let mut gone = Vec::new();
                for (id, tx) in subscribers.iter() {
                    if tx.send(payload.clone()).await.is_err() {
                        gone.push(*id);
                    }
                }
                for id in gone {
                    subscribers.remove(&id);
                }
            }
            Command::Close(id) => {
                subscribers.remove(&id);
                debug!(subscriber = id, total = subscribers.len(), "subscriber left");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_initial_state() -> OnJoin {
        Box::new(|| Ok(None))
    }

    #[tokio::test]
    async fn subscriber_receives_published_payloads_in_order() {
        let hub = FanoutHub::spawn(no_initial_state());
        let mut sub = hub.subscribe().await.unwrap();

        hub.publish(Bytes::from_static(b"one")).await;
        hub.publish(Bytes::from_static(b"two")).await;

        assert_eq!(sub.recv().await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(sub.recv().await.unwrap(), Bytes::from_static(b"two"));
    }

    #[tokio::test]
    async fn new_subscriber_receives_on_join_state_then_subsequent_publishes() {
        let hub = FanoutHub::spawn(Box::new(|| Ok(Some(Bytes::from_static(b"initial")))));
        let mut sub = hub.subscribe().await.unwrap();

        assert_eq!(sub.recv().await.unwrap(), Bytes::from_static(b"initial"));
        hub.publish(Bytes::from_static(b"update")).await;
        assert_eq!(sub.recv().await.unwrap(), Bytes::from_static(b"update"));
    }

    #[tokio::test]
    async fn dropping_a_subscription_removes_it_from_the_registry() {
        let hub = FanoutHub::spawn(no_initial_state());
        let sub = hub.subscribe().await.unwrap();
        drop(sub);

        // Give the hub loop a chance to process the Close command.
        tokio::task::yield_now().await;
        hub.publish(Bytes::from_static(b"noop")).await;
    }
}
