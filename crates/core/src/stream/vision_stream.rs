use std::sync::Arc;

/// Consumer end of a stream.
pub trait Receiver<T>: Send + Sync {
    fn send(&self, value: T);
}

impl<T, F> Receiver<T> for F
where
    F: Fn(T) + Send + Sync,
{
    fn send(&self, value: T) {
        self(value)
    }
}

/// Token returned by [`Stream::connect`]; stops delivery to that receiver.
pub trait Connection: Send + Sync {
    fn disconnect(&self);
}

/// Push-based stream of values.
///
/// Intermediate operators (see [`StreamExt`](super::operators::StreamExt))
/// connect to their upstream only when they are themselves connected, so
/// a chain can be assembled without any upstream subscription existing
/// yet. Threading and hot/cold behaviour are up to each implementation.
pub trait Stream<T>: Send + Sync {
    fn connect(&self, receiver: Arc<dyn Receiver<T>>) -> Box<dyn Connection>;
}

impl<T, S> Stream<T> for Arc<S>
where
    S: Stream<T> + ?Sized,
{
    fn connect(&self, receiver: Arc<dyn Receiver<T>>) -> Box<dyn Connection> {
        (**self).connect(receiver)
    }
}

/// Stateful step of a pipeline: receives one upstream value and emits any
/// number of values downstream, now or later.
pub trait Transformer<T, R>: Send + Sync {
    fn transform(&self, value: T, downstream: &Arc<dyn Receiver<R>>);

    /// Called once when the subscription this transformer serves is
    /// disconnected. Transformers that emit later must stop here.
    fn detach(&self) {}
}

/// Values that carry a discriminating tag, used by `filter_by_kind`.
pub trait Tagged {
    type Tag: PartialEq + Send + Sync + 'static;

    fn tag(&self) -> Self::Tag;
}
