use super::buffer::FrameBuffer;
use super::decoder::{DecoderConnector, FrameDecoder};
use super::uri::SourceUri;
use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::frame::FrameData;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Consecutive decode failures between two repeated warnings
const DECODE_ERROR_LOG_EVERY: u64 = 50;

/// Latest-frame view of one camera.
///
/// A blocking decode task keeps replacing the frame in a private
/// [`FrameBuffer`]; consumers only ever see whole frames through
/// [`FrameSource::snapshot`].
pub struct FrameSource {
    name: String,
    uri: SourceUri,
    buffer: Arc<FrameBuffer>,
    reconnect_requested: Arc<AtomicBool>,
    frames_decoded: Arc<AtomicU64>,
    reconnects: Arc<AtomicU64>,
    cancel: CancellationToken,
    decode_task: Mutex<Option<JoinHandle<()>>>,
}

/// State moved into the decode thread
struct DecodeLoop {
    name: String,
    uri: SourceUri,
    connector: Arc<dyn DecoderConnector>,
    buffer: Arc<FrameBuffer>,
    reconnect_requested: Arc<AtomicBool>,
    frames_decoded: Arc<AtomicU64>,
    reconnects: Arc<AtomicU64>,
    cancel: CancellationToken,
    reconnect_delay: Duration,
    stall_timeout: Duration,
}

impl FrameSource {
    /// Connect to `raw_uri` and start decoding.
    ///
    /// Fails when the address is malformed or the first connection attempt is
    /// refused; once open, the source reconnects on its own.
    pub async fn open(
        name: &str,
        raw_uri: &str,
        connector: Arc<dyn DecoderConnector>,
        config: &SourceConfig,
        cancel: &CancellationToken,
    ) -> Result<Self, SourceError> {
        let uri = SourceUri::parse(raw_uri)?;
        info!("Opening source '{}' at {}", name, uri);

        let decoder = {
            let connector = Arc::clone(&connector);
            let target = uri.clone();
            tokio::task::spawn_blocking(move || connector.connect(&target))
                .await
                .map_err(|e| SourceError::Connection {
                    uri: uri.to_string(),
                    details: format!("connect task failed: {}", e),
                })??
        };

        let source = Self {
            name: name.to_string(),
            uri: uri.clone(),
            buffer: Arc::new(FrameBuffer::new()),
            reconnect_requested: Arc::new(AtomicBool::new(false)),
            frames_decoded: Arc::new(AtomicU64::new(0)),
            reconnects: Arc::new(AtomicU64::new(0)),
            cancel: cancel.child_token(),
            decode_task: Mutex::new(None),
        };

        let decode_loop = DecodeLoop {
            name: source.name.clone(),
            uri,
            connector,
            buffer: Arc::clone(&source.buffer),
            reconnect_requested: Arc::clone(&source.reconnect_requested),
            frames_decoded: Arc::clone(&source.frames_decoded),
            reconnects: Arc::clone(&source.reconnects),
            cancel: source.cancel.clone(),
            reconnect_delay: config.reconnect_delay(),
            stall_timeout: config.stall_timeout(),
        };

        let task = tokio::task::spawn_blocking(move || decode_loop.run(decoder));
        *source.decode_task.lock() = Some(task);

        Ok(source)
    }

    /// Latest decoded frame, `None` until the first frame arrives
    pub fn snapshot(&self) -> Option<FrameData> {
        self.buffer.snapshot()
    }

    /// Ask the decode task to drop and re-open its connection.
    ///
    /// Returns immediately; the previous frame stays readable until a new one
    /// is decoded.
    pub fn refresh(&self) {
        debug!("Refresh requested for source '{}'", self.name);
        self.reconnect_requested.store(true, Ordering::Relaxed);
    }

    /// Stop the decode task and wait for it to release the decoder
    pub async fn close(&self) {
        self.cancel.cancel();

        let task = self.decode_task.lock().take();
        if let Some(task) = task {
            match tokio::time::timeout(Duration::from_secs(3), task).await {
                Ok(Ok(())) => debug!("Decode task for '{}' finished", self.name),
                Ok(Err(e)) => error!("Decode task for '{}' failed: {}", self.name, e),
                Err(_) => warn!(
                    "Decode task for '{}' did not finish within timeout",
                    self.name
                ),
            }
        }

        info!(
            "Source '{}' closed after {} frames ({} reconnects)",
            self.name,
            self.frames_decoded(),
            self.reconnects()
        );
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uri(&self) -> &SourceUri {
        &self.uri
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded.load(Ordering::Relaxed)
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for FrameSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSource")
            .field("name", &self.name)
            .field("uri", &self.uri.to_string())
            .field("frames_decoded", &self.frames_decoded())
            .field("reconnects", &self.reconnects())
            .finish()
    }
}

impl DecodeLoop {
    fn run(self, initial: Box<dyn FrameDecoder>) {
        info!("Decode loop started for '{}'", self.name);

        let mut decoder = Some(initial);
        let mut last_frame_at = Instant::now();
        let mut consecutive_errors: u64 = 0;

        while !self.cancel.is_cancelled() {
            if self.reconnect_requested.swap(false, Ordering::Relaxed) && decoder.is_some() {
                debug!("Dropping decoder for '{}' on refresh", self.name);
                decoder = None;
            }

            if decoder.is_some() && last_frame_at.elapsed() >= self.stall_timeout {
                warn!(
                    "No frame from '{}' for {:?}, reconnecting",
                    self.name, self.stall_timeout
                );
                decoder = None;
            }

            if decoder.is_none() {
                if !self.pause(self.reconnect_delay) {
                    break;
                }
                match self.connector.connect(&self.uri) {
                    Ok(fresh) => {
                        let count = self.reconnects.fetch_add(1, Ordering::Relaxed) + 1;
                        info!("Reconnected '{}' ({} reconnects)", self.name, count);
                        decoder = Some(fresh);
                        last_frame_at = Instant::now();
                        consecutive_errors = 0;
                    }
                    Err(e) => {
                        warn!("Reconnect of '{}' failed: {}", self.name, e);
                    }
                }
                continue;
            }

            let Some(active) = decoder.as_mut() else {
                continue;
            };

            match active.read_frame() {
                Ok(image) => {
                    let id = self.frames_decoded.fetch_add(1, Ordering::Relaxed) + 1;
                    trace!(
                        "Decoded frame {} from '{}' ({}x{})",
                        id,
                        self.name,
                        image.width(),
                        image.height()
                    );
                    self.buffer
                        .publish(FrameData::new(id, SystemTime::now(), image));
                    last_frame_at = Instant::now();
                    consecutive_errors = 0;
                }
                Err(SourceError::EndOfStream) => {
                    info!("Stream from '{}' ended, reconnecting", self.name);
                    decoder = None;
                }
                Err(e) => {
                    consecutive_errors += 1;
                    if consecutive_errors == 1 || consecutive_errors % DECODE_ERROR_LOG_EVERY == 0 {
                        warn!(
                            "Decode error on '{}' ({} in a row): {}",
                            self.name, consecutive_errors, e
                        );
                    } else {
                        trace!("Decode error on '{}': {}", self.name, e);
                    }
                }
            }
        }

        info!("Decode loop stopped for '{}'", self.name);
    }

    /// Sleep for `duration` unless cancelled first; `false` means cancelled
    fn pause(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(50)));
        }
    }
}
