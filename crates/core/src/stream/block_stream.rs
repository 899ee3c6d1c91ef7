use std::marker::PhantomData;
use std::sync::Arc;

use crate::stream::vision_stream::{Connection, Receiver, Stream};

/// Connection whose `disconnect` does nothing.
struct IgnoreConnection;

impl Connection for IgnoreConnection {
    fn disconnect(&self) {}
}

/// Stream that runs a fixed emission script synchronously against each
/// receiver at connect time. Meant for building test inputs; it is not
/// multicast and its connections cannot be disconnected.
pub struct BlockStream<T, F> {
    script: F,
    _values: PhantomData<fn(T)>,
}

impl<T, F> Stream<T> for BlockStream<T, F>
where
    F: Fn(&dyn Receiver<T>) + Send + Sync,
{
    fn connect(&self, receiver: Arc<dyn Receiver<T>>) -> Box<dyn Connection> {
        (self.script)(receiver.as_ref());
        Box::new(IgnoreConnection)
    }
}

/// Builds a [`BlockStream`]:
///
/// ```
/// use framewatch_core::stream::block_stream::block_stream;
/// use framewatch_core::stream::operators::StreamExt;
/// use framewatch_core::stream::vision_stream::Receiver;
///
/// let stream = block_stream(|rx: &dyn Receiver<u8>| {
///     rx.send(1);
///     rx.send(2);
/// });
/// stream.connect_fn(|v| println!("{v}"));
/// ```
pub fn block_stream<T, F>(script: F) -> BlockStream<T, F>
where
    F: Fn(&dyn Receiver<T>) + Send + Sync,
{
    BlockStream {
        script,
        _values: PhantomData,
    }
}
