use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{self, Stream};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::warn;

use crate::capture::{CameraSource, CAPTURE_INTERVAL};
use crate::codec::{self, SNAPSHOT_JPEG_QUALITY, STREAM_JPEG_QUALITY};
use crate::config::CameraEntry;
use crate::errors::Result;

/// Multipart boundary of the MJPEG wire format.
pub const MJPEG_BOUNDARY: &str = "frame";

pub fn mjpeg_content_type() -> String {
    format!("multipart/x-mixed-replace; boundary={}", MJPEG_BOUNDARY)
}

/// Holds one subscription on a source and releases it on every exit path,
/// including consumer disconnects that drop the stream mid-chunk.
struct SubscriberGuard {
    source: Arc<CameraSource>,
}

impl SubscriberGuard {
    fn new(source: Arc<CameraSource>) -> Self {
        source.subscribe();
        Self { source }
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.source.unsubscribe();
    }
}

struct StreamState {
    source: Option<Arc<CameraSource>>,
    _guard: Option<SubscriberGuard>,
    ticker: Interval,
    camera_id: String,
    label: String,
    width: u32,
    height: u32,
}

/// Infinite MJPEG part stream for one viewer.
///
/// Each step pulls the latest frame without blocking, substituting the
/// placeholder when none exists yet (or when the camera never started),
/// and emits one boundary + JPEG part. Steps are paced at the capture
/// cadence no matter how fast the consumer drains; re-encoding an
/// unchanged frame faster buys nothing.
pub fn mjpeg_stream(
    source: Option<Arc<CameraSource>>,
    entry: &CameraEntry,
) -> impl Stream<Item = std::result::Result<Bytes, Infallible>> {
    let (width, height) = placeholder_resolution(entry, source.as_deref());
    let mut ticker = interval(CAPTURE_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let state = StreamState {
        _guard: source.clone().map(SubscriberGuard::new),
        source,
        ticker,
        camera_id: entry.id.clone(),
        label: format!("{} offline", entry.id),
        width,
        height,
    };

    stream::unfold(state, |mut state| async move {
        let chunk = loop {
            state.ticker.tick().await;
            let frame = state
                .source
                .as_ref()
                .and_then(|s| s.get_frame(false, Duration::ZERO))
                .unwrap_or_else(|| codec::placeholder(state.width, state.height, &state.label));
            match codec::encode_frame(&frame, STREAM_JPEG_QUALITY) {
                Ok(jpeg) => break multipart_chunk(&jpeg),
                Err(e) => {
                    // One bad frame is not fatal to the stream; skip it.
                    warn!("Camera '{}': dropping frame: {}", state.camera_id, e);
                }
            }
        };
        Some((Ok(chunk), state))
    })
}

/// One-shot snapshot at snapshot quality. Never subscribes; a snapshot is
/// a stateless read. Falls back to the placeholder when the source is
/// absent or has no frame, so the response body is never empty.
pub fn snapshot_bytes(source: Option<&CameraSource>, entry: &CameraEntry) -> Result<Bytes> {
    let frame = source
        .and_then(|s| s.get_frame(false, Duration::ZERO))
        .unwrap_or_else(|| {
            let (width, height) = placeholder_resolution(entry, source);
            codec::placeholder(width, height, &format!("{} offline", entry.id))
        });
    codec::encode_frame(&frame, SNAPSHOT_JPEG_QUALITY)
}

/// Configured resolution wins, then the device's actual resolution, then
/// the defaults.
fn placeholder_resolution(entry: &CameraEntry, source: Option<&CameraSource>) -> (u32, u32) {
    match (entry.width, entry.height) {
        (Some(w), Some(h)) => (w, h),
        _ => source
            .map(|s| (s.width, s.height))
            .filter(|&(w, h)| w > 0 && h > 0)
            .unwrap_or_else(|| entry.resolution()),
    }
}

fn multipart_chunk(jpeg: &Bytes) -> Bytes {
    let header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        MJPEG_BOUNDARY,
        jpeg.len()
    );
    let mut chunk = Vec::with_capacity(header.len() + jpeg.len() + 2);
    chunk.extend_from_slice(header.as_bytes());
    chunk.extend_from_slice(jpeg);
    chunk.extend_from_slice(b"\r\n");
    Bytes::from(chunk)
}
