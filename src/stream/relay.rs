//! Frame relay
//!
//! Holds the single most recent annotated JPEG. The recording worker
//! replaces it once per loop iteration; any number of HTTP readers copy it
//! out. The lock is held only for the swap or the copy, never across I/O.

use bytes::{BufMut, Bytes, BytesMut};
use futures::Stream;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Multipart boundary used by the relay endpoint
pub const BOUNDARY: &str = "frame";

/// The shared annotated frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveFrame {
    /// Increases by one per publish
    pub sequence: u64,
    pub data: Bytes,
}

#[derive(Default)]
struct Slot {
    frame: Option<LiveFrame>,
    next_sequence: u64,
}

pub struct FrameRelay {
    slot: Mutex<Slot>,
    poll_interval: Duration,
}

impl FrameRelay {
    /// `poll_interval` is how often idle readers look for a new frame
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            slot: Mutex::new(Slot::default()),
            poll_interval,
        }
    }

    /// Relay polling at the frame period of `fps`
    pub fn with_fps(fps: u32) -> Self {
        Self::new(Duration::from_millis(1000 / fps.max(1) as u64))
    }

    /// Replace the current frame (last write wins)
    pub fn publish(&self, data: Bytes) -> u64 {
        let mut slot = self.slot.lock();
        slot.next_sequence += 1;
        let sequence = slot.next_sequence;
        slot.frame = Some(LiveFrame { sequence, data });
        sequence
    }

    /// Copy of the current frame
    pub fn latest(&self) -> Option<LiveFrame> {
        self.slot.lock().frame.clone()
    }

    /// Number of frames published so far
    pub fn sequence(&self) -> u64 {
        self.slot.lock().next_sequence
    }

    /// Infinite multipart stream of frames
    ///
    /// Waits for the first publish, then yields each new frame once. The
    /// stream only ends when the consumer drops it.
    pub fn subscribe(self: &Arc<Self>) -> impl Stream<Item = Bytes> + Send + 'static {
        let relay = Arc::clone(self);
        async_stream::stream! {
            let mut ticker = tokio::time::interval(relay.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut last_sent = 0u64;
            loop {
                ticker.tick().await;
                let current = relay.latest();
                if let Some(frame) = current {
                    if frame.sequence != last_sent {
                        last_sent = frame.sequence;
                        yield create_mjpeg_part(&frame.data);
                    }
                }
            }
        }
    }
}

/// Create MJPEG multipart frame bytes
pub fn create_mjpeg_part(jpeg_data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(128 + jpeg_data.len());

    buf.put_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    buf.put_slice(b"Content-Type: image/jpeg\r\n");
    buf.put_slice(format!("Content-Length: {}\r\n", jpeg_data.len()).as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(jpeg_data);
    buf.put_slice(b"\r\n");

    buf.freeze()
}
