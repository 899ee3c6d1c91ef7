use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use ndarray::ArrayView2;

use crate::shared::geometry::{Rotation, Size};

/// Frame handle shared by every detector of one dispatch.
pub type SharedFrame = Arc<Frame>;

/// Callback run exactly once when a frame is released.
pub type ReleaseHook = Box<dyn FnOnce(&ImageInfo) + Send>;

/// Metadata captured alongside the pixel data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub rotation: Rotation,
    /// Capture time relative to the start of the source.
    pub timestamp: Duration,
    pub index: usize,
}

impl ImageInfo {
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

/// One buffer plane of a frame, with a read cursor.
///
/// The cursor mirrors the byte-buffer position of camera image planes:
/// readers advance it while consuming bytes, so it must be rewound before
/// the next reader starts. [`Frame::exclusive_use`] does that.
#[derive(Debug)]
pub struct Plane {
    data: Vec<u8>,
    row_stride: usize,
    pixel_stride: usize,
    position: AtomicUsize,
}

impl Clone for Plane {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            row_stride: self.row_stride,
            pixel_stride: self.pixel_stride,
            position: AtomicUsize::new(self.position()),
        }
    }
}

impl Plane {
    pub fn new(data: Vec<u8>, row_stride: usize, pixel_stride: usize) -> Self {
        debug_assert!(row_stride > 0, "row_stride must be positive");
        Self {
            data,
            row_stride,
            pixel_stride,
            position: AtomicUsize::new(0),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn row_stride(&self) -> usize {
        self.row_stride
    }

    pub fn pixel_stride(&self) -> usize {
        self.pixel_stride
    }

    pub fn position(&self) -> usize {
        self.position.load(Ordering::Acquire)
    }

    pub fn remaining(&self) -> &[u8] {
        &self.data[self.position()..]
    }

    /// Copies bytes from the cursor into `buf`, advancing the cursor.
    /// Returns the number of bytes copied.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let start = self.position();
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.position.store(start + n, Ordering::Release);
        n
    }

    pub fn rewind(&self) {
        self.position.store(0, Ordering::Release);
    }

    /// Rows of the plane as a `(rows, row_stride)` view.
    pub fn as_ndarray(&self) -> ArrayView2<'_, u8> {
        let stride = self.row_stride.max(1);
        let rows = self.data.len() / stride;
        ArrayView2::from_shape((rows, stride), &self.data[..rows * stride])
            .expect("Plane rows must fit the buffer")
    }
}

/// Owner of the current read episode and its nesting depth.
#[derive(Default)]
struct Episode {
    owner: Option<ThreadId>,
    depth: usize,
}

/// Leaves one level of a read episode when dropped.
struct EpisodeGuard<'a> {
    frame: &'a Frame,
}

impl Drop for EpisodeGuard<'_> {
    fn drop(&mut self) {
        let mut episode = self
            .frame
            .episode
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        episode.depth -= 1;
        if episode.depth == 0 {
            episode.owner = None;
            self.frame.episode_ended.notify_one();
        }
    }
}

/// A captured camera frame: metadata plus raw planes.
///
/// A frame is released exactly once. `close` consumes the handle, and a
/// frame dropped without being closed is released by `Drop`, so neither a
/// double release nor a leak can be expressed.
pub struct Frame {
    info: ImageInfo,
    planes: Vec<Plane>,
    episode: Mutex<Episode>,
    episode_ended: Condvar,
    release: Mutex<Option<ReleaseHook>>,
}

impl Frame {
    pub fn new(info: ImageInfo, planes: Vec<Plane>) -> Self {
        Self {
            info,
            planes,
            episode: Mutex::new(Episode::default()),
            episode_ended: Condvar::new(),
            release: Mutex::new(None),
        }
    }

    /// Single packed RGB plane.
    pub fn rgb(data: Vec<u8>, width: u32, height: u32, rotation: Rotation, index: usize) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * 3,
            "data length must equal width * height * 3"
        );
        let info = ImageInfo {
            width,
            height,
            rotation,
            timestamp: Duration::ZERO,
            index,
        };
        Self::new(info, vec![Plane::new(data, width as usize * 3, 3)])
    }

    pub fn with_timestamp(mut self, timestamp: Duration) -> Self {
        self.info.timestamp = timestamp;
        self
    }

    /// Installs the hook run when this frame is released.
    pub fn with_release(self, hook: impl FnOnce(&ImageInfo) + Send + 'static) -> Self {
        *self.release.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(hook));
        self
    }

    pub fn info(&self) -> ImageInfo {
        self.info
    }

    pub fn width(&self) -> u32 {
        self.info.width
    }

    pub fn height(&self) -> u32 {
        self.info.height
    }

    pub fn rotation(&self) -> Rotation {
        self.info.rotation
    }

    pub fn timestamp(&self) -> Duration {
        self.info.timestamp
    }

    pub fn index(&self) -> usize {
        self.info.index
    }

    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }

    /// Runs `read` with exclusive access to the planes.
    ///
    /// The outermost call of a read episode rewinds every cursor first, so
    /// each episode sees the buffers from offset zero no matter where the
    /// previous reader left them. Other threads wait for the episode to
    /// end. A nested call from the thread that owns the episode runs
    /// straight away on the planes as the outer reader left them.
    pub fn exclusive_use<R>(&self, read: impl FnOnce(&[Plane]) -> R) -> R {
        let _episode = self.enter_episode();
        read(&self.planes)
    }

    fn enter_episode(&self) -> EpisodeGuard<'_> {
        let me = thread::current().id();
        let mut episode = self.episode.lock().unwrap_or_else(PoisonError::into_inner);
        if episode.owner == Some(me) {
            episode.depth += 1;
            return EpisodeGuard { frame: self };
        }
        while episode.owner.is_some() {
            episode = self
                .episode_ended
                .wait(episode)
                .unwrap_or_else(PoisonError::into_inner);
        }
        episode.owner = Some(me);
        episode.depth = 1;
        for plane in &self.planes {
            plane.rewind();
        }
        EpisodeGuard { frame: self }
    }

    /// Releases the frame back to its producer.
    pub fn close(self) {
        drop(self);
    }

    /// Releases through a shared handle once every reader is known to be
    /// done. Returns `false` if the frame was already released.
    pub(crate) fn release(&self) -> bool {
        let hook = self
            .release
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match hook {
            Some(hook) => {
                hook(&self.info);
                true
            }
            None => false,
        }
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame").field("info", &self.info).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn counting_frame(counter: &Arc<AtomicUsize>) -> Frame {
        let counter = counter.clone();
        Frame::rgb(vec![0u8; 12], 2, 2, Rotation::Deg0, 3).with_release(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_construction_and_accessors() {
        let frame = Frame::rgb(vec![0u8; 24], 4, 2, Rotation::Deg90, 5)
            .with_timestamp(Duration::from_millis(40));
        assert_eq!(frame.width(), 4);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.rotation(), Rotation::Deg90);
        assert_eq!(frame.index(), 5);
        assert_eq!(frame.timestamp(), Duration::from_millis(40));
        assert_eq!(frame.plane_count(), 1);
        assert_eq!(frame.info().size(), Size::new(4, 2));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "data length must equal width * height * 3")]
    fn test_mismatched_data_length_panics_in_debug() {
        Frame::rgb(vec![0u8; 10], 2, 2, Rotation::Deg0, 0);
    }

    #[test]
    fn test_close_runs_release_once() {
        let released = Arc::new(AtomicUsize::new(0));
        counting_frame(&released).close();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_without_close_still_releases() {
        let released = Arc::new(AtomicUsize::new(0));
        {
            let _frame = counting_frame(&released);
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_receives_frame_info() {
        let (tx, rx) = crossbeam_channel::unbounded();
        Frame::rgb(vec![0u8; 12], 2, 2, Rotation::Deg180, 9)
            .with_release(move |info| {
                let _ = tx.send(*info);
            })
            .close();
        let info = rx.try_recv().unwrap();
        assert_eq!(info.index, 9);
        assert_eq!(info.rotation, Rotation::Deg180);
    }

    #[test]
    fn test_release_through_shared_handle_happens_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let shared: SharedFrame = Arc::new(counting_frame(&released));
        let reader = shared.clone();
        assert!(shared.release());
        assert!(!reader.release());
        drop(reader);
        drop(shared);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shared_frame_releases_when_last_holder_drops() {
        let released = Arc::new(AtomicUsize::new(0));
        let shared: SharedFrame = Arc::new(counting_frame(&released));
        let other = shared.clone();
        drop(shared);
        assert_eq!(released.load(Ordering::SeqCst), 0);
        drop(other);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    // ── Plane access ─────────────────────────────────────────────────

    #[test]
    fn test_plane_read_advances_cursor() {
        let plane = Plane::new(vec![1, 2, 3, 4, 5, 6], 3, 1);
        let mut buf = [0u8; 4];
        assert_eq!(plane.read(&mut buf), 4);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(plane.position(), 4);
        assert_eq!(plane.remaining(), &[5, 6]);
        assert_eq!(plane.read(&mut buf), 2);
        assert_eq!(plane.read(&mut buf), 0);
    }

    #[test]
    fn test_plane_as_ndarray_shape() {
        let plane = Plane::new(vec![0u8; 24], 12, 3);
        assert_eq!(plane.as_ndarray().shape(), &[2, 12]);
    }

    #[test]
    fn test_exclusive_use_rewinds_cursor_between_readers() {
        let frame = Frame::rgb((0..12).collect(), 2, 2, Rotation::Deg0, 0);
        let first = frame.exclusive_use(|planes| {
            let mut buf = [0u8; 12];
            planes[0].read(&mut buf);
            buf
        });
        let second = frame.exclusive_use(|planes| {
            assert_eq!(planes[0].position(), 0);
            let mut buf = [0u8; 12];
            planes[0].read(&mut buf);
            buf
        });
        assert_eq!(first, second);
    }

    #[test]
    fn test_exclusive_use_from_concurrent_readers() {
        let frame: SharedFrame = Arc::new(Frame::rgb((0..48).collect(), 4, 4, Rotation::Deg0, 0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let frame = frame.clone();
                thread::spawn(move || {
                    frame.exclusive_use(|planes| {
                        let mut buf = vec![0u8; 48];
                        let n = planes[0].read(&mut buf);
                        (n, buf[47])
                    })
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), (48, 47));
        }
    }

    #[test]
    fn test_nested_exclusive_use_on_owning_thread_continues_episode() {
        let frame: SharedFrame = Arc::new(Frame::rgb((0..12).collect(), 2, 2, Rotation::Deg0, 0));
        let reader = frame.clone();
        let (tx, rx) = crossbeam_channel::bounded(1);
        thread::spawn(move || {
            let nested = reader.exclusive_use(|planes| {
                let mut head = [0u8; 4];
                planes[0].read(&mut head);
                reader.exclusive_use(|inner| inner[0].remaining().to_vec())
            });
            let _ = tx.send(nested);
        });

        let nested = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(nested, (4..12).collect::<Vec<u8>>());
        assert_eq!(frame.exclusive_use(|planes| planes[0].position()), 0);
    }

    #[test]
    fn test_other_thread_waits_for_nested_episode_to_end() {
        let frame: SharedFrame = Arc::new(Frame::rgb(vec![0u8; 12], 2, 2, Rotation::Deg0, 0));
        let inside = Arc::new(AtomicBool::new(false));
        let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
        let (leave_tx, leave_rx) = crossbeam_channel::bounded::<()>(1);

        let owner = {
            let frame = frame.clone();
            let inside = inside.clone();
            thread::spawn(move || {
                frame.exclusive_use(|_| {
                    frame.exclusive_use(|_| {
                        inside.store(true, Ordering::SeqCst);
                        let _ = entered_tx.send(());
                        let _ = leave_rx.recv();
                        inside.store(false, Ordering::SeqCst);
                    });
                });
            })
        };
        entered_rx.recv_timeout(Duration::from_secs(1)).unwrap();

        let contender = {
            let frame = frame.clone();
            let inside = inside.clone();
            thread::spawn(move || frame.exclusive_use(|_| inside.load(Ordering::SeqCst)))
        };
        thread::sleep(Duration::from_millis(20));
        leave_tx.send(()).unwrap();

        owner.join().unwrap();
        assert!(!contender.join().unwrap());
    }
}
