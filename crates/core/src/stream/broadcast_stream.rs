use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::stream::vision_stream::{Connection, Receiver, Stream};

struct Subscribers<T> {
    next_id: u64,
    receivers: Vec<(u64, Arc<dyn Receiver<T>>)>,
}

/// Multicast stream: every published value goes to every receiver that is
/// connected when `publish` is called.
///
/// Delivery iterates over a snapshot taken under the lock and runs with the
/// lock released, so receivers may connect or disconnect (themselves or
/// others) from inside `send` without affecting the value being delivered.
/// The order in which receivers see one value is unspecified.
pub struct BroadcastStream<T> {
    subscribers: Arc<Mutex<Subscribers<T>>>,
}

impl<T: Clone + Send + 'static> BroadcastStream<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Subscribers {
                next_id: 0,
                receivers: Vec::new(),
            })),
        }
    }

    pub fn publish(&self, value: T) {
        let snapshot: Vec<Arc<dyn Receiver<T>>> = {
            let subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
            subscribers.receivers.iter().map(|(_, r)| r.clone()).collect()
        };

        let Some((last, rest)) = snapshot.split_last() else {
            return;
        };
        for receiver in rest {
            receiver.send(value.clone());
        }
        last.send(value);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .receivers
            .len()
    }
}

impl<T: Clone + Send + 'static> Default for BroadcastStream<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Stream<T> for BroadcastStream<T> {
    fn connect(&self, receiver: Arc<dyn Receiver<T>>) -> Box<dyn Connection> {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        subscribers.receivers.push((id, receiver));
        Box::new(ReceiverConnection {
            subscribers: Arc::downgrade(&self.subscribers),
            id,
        })
    }
}

/// Removes its receiver from the stream on `disconnect`. Idempotent, and
/// does not keep the stream alive.
struct ReceiverConnection<T> {
    subscribers: Weak<Mutex<Subscribers<T>>>,
    id: u64,
}

impl<T: Send + 'static> Connection for ReceiverConnection<T> {
    fn disconnect(&self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .receivers
                .retain(|(id, _)| *id != self.id);
        }
    }
}
