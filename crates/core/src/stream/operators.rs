use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::stream::vision_stream::{Connection, Receiver, Stream, Tagged, Transformer};

type TransformFn<T, R> = dyn Fn(T, &Arc<dyn Receiver<R>>) + Send + Sync;

/// Forwards `disconnect` to the upstream subscription made on behalf of a
/// derived stream.
struct DelegatedConnection(Box<dyn Connection>);

impl Connection for DelegatedConnection {
    fn disconnect(&self) {
        self.0.disconnect();
    }
}

/// Stream derived from `upstream` by a transform closure.
pub struct TransformStream<S, T, R> {
    upstream: S,
    transform: Arc<TransformFn<T, R>>,
}

impl<S, T, R> Stream<R> for TransformStream<S, T, R>
where
    S: Stream<T>,
    T: 'static,
    R: 'static,
{
    fn connect(&self, receiver: Arc<dyn Receiver<R>>) -> Box<dyn Connection> {
        let transform = self.transform.clone();
        let upstream = self
            .upstream
            .connect(Arc::new(move |value: T| transform(value, &receiver)));
        Box::new(DelegatedConnection(upstream))
    }
}

/// Disconnects the upstream subscription, then detaches the transformer
/// that fed the receiver.
struct ThroughConnection<T, R> {
    upstream: Box<dyn Connection>,
    transformer: Arc<dyn Transformer<T, R>>,
    detached: AtomicBool,
}

impl<T: 'static, R: 'static> Connection for ThroughConnection<T, R> {
    fn disconnect(&self) {
        self.upstream.disconnect();
        if !self.detached.swap(true, Ordering::AcqRel) {
            self.transformer.detach();
        }
    }
}

/// Stream derived from `upstream` by a [`Transformer`] built per connection.
pub struct ThroughStream<S, M, T, R> {
    upstream: S,
    make: M,
    _values: PhantomData<fn(T) -> R>,
}

impl<S, M, X, T, R> Stream<R> for ThroughStream<S, M, T, R>
where
    S: Stream<T>,
    M: Fn() -> X + Send + Sync,
    X: Transformer<T, R> + 'static,
    T: 'static,
    R: 'static,
{
    fn connect(&self, receiver: Arc<dyn Receiver<R>>) -> Box<dyn Connection> {
        let transformer: Arc<dyn Transformer<T, R>> = Arc::new((self.make)());
        let feed = transformer.clone();
        let upstream = self
            .upstream
            .connect(Arc::new(move |value: T| feed.transform(value, &receiver)));
        Box::new(ThroughConnection {
            upstream,
            transformer,
            detached: AtomicBool::new(false),
        })
    }
}

/// Intermediate and terminal operators available on every stream.
pub trait StreamExt<T: 'static>: Stream<T> + Sized + 'static {
    /// Most general intermediate operator: `f` receives each upstream value
    /// and the downstream receiver, and may emit zero, one or many values.
    fn transform<R: 'static>(
        self,
        f: impl Fn(T, &Arc<dyn Receiver<R>>) + Send + Sync + 'static,
    ) -> TransformStream<Self, T, R> {
        TransformStream {
            upstream: self,
            transform: Arc::new(f),
        }
    }

    /// Like [`transform`](Self::transform) with a stateful transformer.
    /// `make` runs once per connection so subscriptions never share state.
    fn through<R, M, X>(self, make: M) -> ThroughStream<Self, M, T, R>
    where
        M: Fn() -> X + Send + Sync + 'static,
        X: Transformer<T, R> + 'static,
        R: 'static,
    {
        ThroughStream {
            upstream: self,
            make,
            _values: PhantomData,
        }
    }

    fn filter(
        self,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> TransformStream<Self, T, T> {
        self.transform(move |value, downstream| {
            if predicate(&value) {
                downstream.send(value);
            }
        })
    }

    /// Keeps only values whose tag equals `tag`.
    fn filter_by_kind(self, tag: T::Tag) -> TransformStream<Self, T, T>
    where
        T: Tagged,
    {
        self.filter(move |value| value.tag() == tag)
    }

    fn map<R: 'static>(self, f: impl Fn(T) -> R + Send + Sync + 'static) -> TransformStream<Self, T, R> {
        self.transform(move |value, downstream| downstream.send(f(value)))
    }

    /// Terminal operator connecting a closure.
    fn connect_fn(&self, f: impl Fn(T) + Send + Sync + 'static) -> Box<dyn Connection> {
        self.connect(Arc::new(f))
    }
}

impl<T: 'static, S: Stream<T> + Sized + 'static> StreamExt<T> for S {}
