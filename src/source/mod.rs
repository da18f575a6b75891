mod buffer;
mod decoder;
mod frame_source;
mod uri;

pub use buffer::FrameBuffer;
pub use decoder::{DecoderConnector, DefaultConnector, FrameDecoder, SyntheticDecoder};
pub use frame_source::FrameSource;
pub use uri::SourceUri;
