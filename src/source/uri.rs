use crate::error::SourceError;
use std::fmt;

/// Normalised camera source address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceUri {
    /// Local capture device, e.g. `/dev/video0`
    Webcam(u32),
    /// Generated frames; the payload is whatever followed `stub://`
    Synthetic(String),
    /// Anything a decoder can open by URL (rtsp, http, file)
    Network(String),
}

impl SourceUri {
    /// Parse a registry source string.
    ///
    /// `"0"` and `":@0:"` select the first webcam, bare `user:pass@host/path`
    /// strings are treated as RTSP.
    pub fn parse(raw: &str) -> Result<Self, SourceError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(SourceError::Unsupported {
                uri: raw.to_string(),
                details: "empty source".to_string(),
            });
        }

        if raw == "0" || raw == ":@0:" {
            return Ok(Self::Webcam(0));
        }

        if let Some(index) = raw
            .strip_prefix("webcam:")
            .or_else(|| raw.strip_prefix("/dev/video"))
        {
            return index
                .parse::<u32>()
                .map(Self::Webcam)
                .map_err(|_| SourceError::Unsupported {
                    uri: raw.to_string(),
                    details: format!("invalid device index '{}'", index),
                });
        }

        if let Some(rest) = raw.strip_prefix("stub://") {
            return Ok(Self::Synthetic(rest.to_string()));
        }

        if raw.contains("://") {
            Ok(Self::Network(raw.to_string()))
        } else {
            Ok(Self::Network(format!("rtsp://{}", raw)))
        }
    }

    pub fn is_webcam(&self) -> bool {
        matches!(self, Self::Webcam(_))
    }
}

impl fmt::Display for SourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Webcam(index) => write!(f, "webcam:{}", index),
            Self::Synthetic(spec) => write!(f, "stub://{}", spec),
            // Credentials stay out of logs
            Self::Network(url) => match (url.find("://"), url.rfind('@')) {
                (Some(scheme_end), Some(at)) if at > scheme_end => {
                    write!(f, "{}***{}", &url[..scheme_end + 3], &url[at..])
                }
                _ => f.write_str(url),
            },
        }
    }
}
