use super::uri::SourceUri;
use crate::error::SourceError;
use image::{Rgb, RgbImage};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// A live decoder connection producing RGB frames.
///
/// `read_frame` blocks until the next frame is decoded; it runs on a
/// dedicated blocking thread, never on the async runtime.
pub trait FrameDecoder: Send {
    fn read_frame(&mut self) -> Result<RgbImage, SourceError>;
}

/// Opens decoder connections for a source address
pub trait DecoderConnector: Send + Sync {
    fn connect(&self, uri: &SourceUri) -> Result<Box<dyn FrameDecoder>, SourceError>;
}

/// Connector used in production: synthetic sources always, GStreamer for
/// webcams and network streams when built with the `camera` feature.
#[derive(Debug, Clone)]
pub struct DefaultConnector {
    synthetic_fps: u32,
}

impl DefaultConnector {
    pub fn new(synthetic_fps: u32) -> Self {
        Self {
            synthetic_fps: synthetic_fps.max(1),
        }
    }
}

impl DecoderConnector for DefaultConnector {
    fn connect(&self, uri: &SourceUri) -> Result<Box<dyn FrameDecoder>, SourceError> {
        match uri {
            SourceUri::Synthetic(spec) => Ok(Box::new(SyntheticDecoder::from_spec(
                spec,
                self.synthetic_fps,
            )?)),
            #[cfg(all(target_os = "linux", feature = "camera"))]
            SourceUri::Webcam(_) | SourceUri::Network(_) => {
                Ok(Box::new(gst::GstDecoder::connect(uri)?))
            }
            #[cfg(not(all(target_os = "linux", feature = "camera")))]
            SourceUri::Webcam(_) | SourceUri::Network(_) => Err(SourceError::Unsupported {
                uri: uri.to_string(),
                details: "built without the `camera` feature".to_string(),
            }),
        }
    }
}

/// Generated frames for `stub://` sources.
///
/// Address grammar: `stub://[still/]WIDTHxHEIGHT`. Without `still` a bright
/// square sweeps across a flat background so motion can be observed.
#[derive(Debug)]
pub struct SyntheticDecoder {
    width: u32,
    height: u32,
    still: bool,
    frame_interval: Duration,
    next_frame_at: Instant,
    tick: u32,
}

impl SyntheticDecoder {
    pub fn new(width: u32, height: u32, still: bool, fps: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            still,
            frame_interval: Duration::from_millis(1000 / fps.max(1) as u64),
            next_frame_at: Instant::now(),
            tick: 0,
        }
    }

    pub fn from_spec(spec: &str, fps: u32) -> Result<Self, SourceError> {
        let mut still = false;
        let mut size = (320, 240);

        for token in spec.split('/').filter(|token| !token.is_empty()) {
            if token == "still" {
                still = true;
                continue;
            }
            let parsed = token
                .split_once('x')
                .and_then(|(w, h)| Some((w.parse::<u32>().ok()?, h.parse::<u32>().ok()?)));
            match parsed {
                Some((w, h)) if w > 0 && h > 0 => size = (w, h),
                _ => {
                    return Err(SourceError::Unsupported {
                        uri: format!("stub://{}", spec),
                        details: format!("unrecognised token '{}'", token),
                    })
                }
            }
        }

        debug!(
            "Synthetic source {}x{} (still: {}) at {} fps",
            size.0, size.1, still, fps
        );
        Ok(Self::new(size.0, size.1, still, fps))
    }

    fn render(&self) -> RgbImage {
        let mut image = RgbImage::from_pixel(self.width, self.height, Rgb([60, 60, 60]));
        if self.still {
            return image;
        }

        let side = (self.width.min(self.height) / 4).max(1);
        let span = self.width.saturating_sub(side).max(1);
        let x0 = self.tick.wrapping_mul(7) % span;
        let y0 = (self.height - side) / 2;
        for y in y0..(y0 + side).min(self.height) {
            for x in x0..(x0 + side).min(self.width) {
                image.put_pixel(x, y, Rgb([230, 230, 230]));
            }
        }
        image
    }
}

impl FrameDecoder for SyntheticDecoder {
    fn read_frame(&mut self) -> Result<RgbImage, SourceError> {
        let now = Instant::now();
        if self.next_frame_at > now {
            std::thread::sleep(self.next_frame_at - now);
        }
        self.next_frame_at = Instant::now() + self.frame_interval;
        self.tick = self.tick.wrapping_add(1);
        Ok(self.render())
    }
}

impl Drop for SyntheticDecoder {
    fn drop(&mut self) {
        info!("Synthetic decoder closed after {} frames", self.tick);
    }
}

#[cfg(all(target_os = "linux", feature = "camera"))]
mod gst {
    use super::SourceUri;
    use crate::error::SourceError;
    use gstreamer::prelude::*;
    use gstreamer::Pipeline;
    use gstreamer_app::AppSink;
    use gstreamer_video::VideoInfo;
    use image::RgbImage;
    use tracing::{debug, info, warn};

    /// GStreamer pipeline ending in an RGB appsink that keeps only the newest
    /// buffer.
    pub(super) struct GstDecoder {
        pipeline: Pipeline,
        appsink: AppSink,
    }

    impl GstDecoder {
        pub(super) fn connect(uri: &SourceUri) -> Result<Self, SourceError> {
            let connection_error = |details: String| SourceError::Connection {
                uri: uri.to_string(),
                details,
            };

            gstreamer::init()
                .map_err(|e| connection_error(format!("Failed to initialize GStreamer: {}", e)))?;

            let head = match uri {
                SourceUri::Webcam(index) => format!("v4l2src device=/dev/video{}", index),
                SourceUri::Network(url) => format!("uridecodebin uri=\"{}\"", url),
                SourceUri::Synthetic(_) => {
                    return Err(connection_error(
                        "synthetic sources do not use GStreamer".to_string(),
                    ))
                }
            };

            let pipeline_desc = format!(
                "{} ! videoconvert ! video/x-raw,format=RGB ! \
                 appsink name=sink sync=false max-buffers=1 drop=true",
                head
            );
            debug!("Creating GStreamer pipeline for {}", uri);

            let pipeline = gstreamer::parse::launch(&pipeline_desc)
                .map_err(|e| connection_error(format!("Failed to create pipeline: {}", e)))?
                .downcast::<Pipeline>()
                .map_err(|_| connection_error("Failed to downcast to Pipeline".to_string()))?;

            let appsink = pipeline
                .by_name("sink")
                .ok_or_else(|| connection_error("Failed to get appsink element".to_string()))?
                .downcast::<AppSink>()
                .map_err(|_| connection_error("Failed to downcast to AppSink".to_string()))?;

            pipeline
                .set_state(gstreamer::State::Playing)
                .map_err(|e| connection_error(format!("Failed to start pipeline: {}", e)))?;

            // Network sources change state asynchronously; wait for the outcome
            let (result, _, _) = pipeline.state(gstreamer::ClockTime::from_seconds(10));
            if let Err(e) = result {
                let _ = pipeline.set_state(gstreamer::State::Null);
                return Err(connection_error(format!("Pipeline failed to play: {}", e)));
            }

            info!("GStreamer pipeline playing for {}", uri);
            Ok(Self { pipeline, appsink })
        }
    }

    impl super::FrameDecoder for GstDecoder {
        fn read_frame(&mut self) -> Result<RgbImage, SourceError> {
            let sample = match self
                .appsink
                .try_pull_sample(gstreamer::ClockTime::from_seconds(1))
            {
                Some(sample) => sample,
                None if self.appsink.is_eos() => return Err(SourceError::EndOfStream),
                None => {
                    return Err(SourceError::Decode {
                        details: "No sample within 1s".to_string(),
                    })
                }
            };

            let caps = sample.caps().ok_or_else(|| SourceError::Decode {
                details: "No caps in sample".to_string(),
            })?;
            let info = VideoInfo::from_caps(caps).map_err(|e| SourceError::Decode {
                details: format!("Failed to get video info: {}", e),
            })?;
            let buffer = sample.buffer().ok_or_else(|| SourceError::Decode {
                details: "No buffer in sample".to_string(),
            })?;
            let map = buffer.map_readable().map_err(|e| SourceError::Decode {
                details: format!("Failed to map buffer: {}", e),
            })?;

            let width = info.width() as usize;
            let height = info.height() as usize;
            let stride = info.stride()[0] as usize;
            let data = map.as_slice();
            if stride < width * 3 || data.len() < stride * height {
                return Err(SourceError::Decode {
                    details: format!(
                        "Buffer of {} bytes too small for {}x{} (stride {})",
                        data.len(),
                        width,
                        height,
                        stride
                    ),
                });
            }

            // Rows may be padded; copy them tightly
            let mut pixels = Vec::with_capacity(width * height * 3);
            for row in data.chunks(stride).take(height) {
                pixels.extend_from_slice(&row[..width * 3]);
            }

            RgbImage::from_raw(width as u32, height as u32, pixels).ok_or_else(|| {
                SourceError::Decode {
                    details: "Failed to build RGB image from sample".to_string(),
                }
            })
        }
    }

    impl Drop for GstDecoder {
        fn drop(&mut self) {
            if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
                warn!("Failed to stop GStreamer pipeline cleanly: {}", e);
            }
        }
    }
}
