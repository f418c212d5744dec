//! Local Media Source
//!
//! Holds at most one captured stream per connection. Acquisition runs off the
//! event loop; [`LocalMedia::ensure_started`] hands the caller a ticketed
//! future and [`LocalMedia::complete`] only accepts the result if the ticket
//! is still current.

#[cfg(feature = "microphone")]
pub mod microphone;

#[cfg(feature = "microphone")]
pub use microphone::MicrophoneDevice;

use crate::peer::transport::PeerTransport;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::track::track_local::TrackLocal;

/// Local track handle shared with every session
pub type LocalTrack = Arc<dyn TrackLocal + Send + Sync>;

/// Capture device seam
#[async_trait]
pub trait MediaDevice: Send + Sync {
    /// Open the device and start producing samples
    async fn acquire(&self) -> Result<LocalStream>;
}

/// A captured stream: its tracks plus a release flag the producer watches
#[derive(Clone)]
pub struct LocalStream {
    id: String,
    tracks: Vec<LocalTrack>,
    released: Arc<AtomicBool>,
}

impl LocalStream {
    pub fn new(id: impl Into<String>, tracks: Vec<LocalTrack>) -> Self {
        Self {
            id: id.into(),
            tracks,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    /// Flag set once the stream is stopped; capture loops poll it
    pub fn release_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.released)
    }

    /// Release the device; idempotent
    pub fn stop(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            debug!(stream_id = %self.id, "Local stream stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for LocalStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStream")
            .field("id", &self.id)
            .field("tracks", &self.tracks.len())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Device used in listen-only mode: acquisition always fails
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCaptureDevice;

#[async_trait]
impl MediaDevice for NoCaptureDevice {
    async fn acquire(&self) -> Result<LocalStream> {
        Err(Error::MediaUnavailable("capture disabled".to_string()))
    }
}

/// Acquisition handed to the caller to drive
pub struct PendingAcquisition {
    pub ticket: u64,
    pub future: BoxFuture<'static, Result<LocalStream>>,
}

#[derive(Debug)]
enum MediaState {
    Idle,
    Acquiring(u64),
    Ready(LocalStream),
}

pub struct LocalMedia {
    device: Arc<dyn MediaDevice>,
    state: MediaState,
    next_ticket: u64,
}

impl LocalMedia {
    pub fn new(device: Arc<dyn MediaDevice>) -> Self {
        Self {
            device,
            state: MediaState::Idle,
            next_ticket: 0,
        }
    }

    /// Start acquisition unless a stream is held or already being acquired
    pub fn ensure_started(&mut self) -> Option<PendingAcquisition> {
        if !matches!(self.state, MediaState::Idle) {
            return None;
        }

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.state = MediaState::Acquiring(ticket);

        let device = Arc::clone(&self.device);
        debug!(ticket, "Acquiring local media");
        Some(PendingAcquisition {
            ticket,
            future: Box::pin(async move { device.acquire().await }),
        })
    }

    /// Accept the outcome of an acquisition
    ///
    /// Returns the stream when it became current. A stream for a stale ticket
    /// is stopped on the spot. Failures leave the source idle.
    pub fn complete(&mut self, ticket: u64, result: Result<LocalStream>) -> Option<LocalStream> {
        let current = matches!(self.state, MediaState::Acquiring(t) if t == ticket);

        match (current, result) {
            (true, Ok(stream)) => {
                info!(stream_id = %stream.id(), tracks = stream.tracks().len(), "Local media started");
                self.state = MediaState::Ready(stream.clone());
                Some(stream)
            }
            (true, Err(e)) => {
                warn!("Local media unavailable, continuing receive-only: {}", e);
                self.state = MediaState::Idle;
                None
            }
            (false, Ok(stream)) => {
                debug!(ticket, "Releasing stream from superseded acquisition");
                stream.stop();
                None
            }
            (false, Err(e)) => {
                debug!(ticket, "Superseded acquisition failed: {}", e);
                None
            }
        }
    }

    pub fn current(&self) -> Option<&LocalStream> {
        match &self.state {
            MediaState::Ready(stream) => Some(stream),
            _ => None,
        }
    }

    pub fn is_acquiring(&self) -> bool {
        matches!(self.state, MediaState::Acquiring(_))
    }

    /// Add the held stream's tracks to a transport
    ///
    /// Returns whether anything was attached.
    pub async fn attach_to(&self, transport: &dyn PeerTransport) -> Result<bool> {
        match self.current() {
            Some(stream) => {
                transport.add_local_stream(stream).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Release the device and forget any in-flight acquisition
    ///
    /// Returns whether a stream was held or being acquired.
    pub fn stop_all(&mut self) -> bool {
        match std::mem::replace(&mut self.state, MediaState::Idle) {
            MediaState::Ready(stream) => {
                stream.stop();
                info!("Local media stopped");
                true
            }
            MediaState::Acquiring(_) => true,
            MediaState::Idle => false,
        }
    }
}
