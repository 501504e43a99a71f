//! Frame serialization
//!
//! Encoding is stateless: every function borrows the frame and returns a
//! fresh buffer. Payloads that carry more than one buffer (mono with depth,
//! stereo pairs) are MessagePack maps whose values are the individually
//! encoded buffers.

mod media;
mod tagged;

use std::fmt;

use bytes::Bytes;
use image::ImageEncoder;
use serde::{Deserialize, Serialize};
use sv_core::Frame;
use sv_renderer::StereoFrames;

pub use media::{
    FrameLayout, FrameStatus, MEDIA_CLOCK_RATE, MEDIA_HEADER_LEN, MediaFrame, frame_duration,
};
pub use tagged::{Dtype, pack_color, pack_depth, write_array};

/// Wire representation of a frame
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum EncodingFormat {
    /// Row-major byte dump, no header
    #[default]
    RawRgba,
    /// msgpack-numpy array envelope
    TaggedNumericArray,
    /// Lossless PNG, for snapshots rather than per-frame streaming
    ImageContainer,
    /// Timestamped unit for continuous streams
    MediaFrame,
}

impl EncodingFormat {
    pub fn name(&self) -> &'static str {
        match self {
            EncodingFormat::RawRgba => "raw-rgba",
            EncodingFormat::TaggedNumericArray => "tagged-numeric-array",
            EncodingFormat::ImageContainer => "image-container",
            EncodingFormat::MediaFrame => "media-frame",
        }
    }

    /// True when depth buffers can be carried losslessly
    pub fn supports_depth(&self) -> bool {
        matches!(
            self,
            EncodingFormat::RawRgba | EncodingFormat::TaggedNumericArray
        )
    }
}

impl fmt::Display for EncodingFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Encoding errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EncodeError {
    #[error("{0} cannot carry a floating-point depth buffer")]
    UnsupportedDepth(EncodingFormat),
    #[error("media-frame payloads need a presentation timestamp, build them with MediaFrame")]
    NeedsTimestamp,
    #[error("Buffer shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("MessagePack error: {0}")]
    Pack(String),
    #[error("Image encoding error: {0}")]
    Image(String),
    #[error("Malformed payload: {0}")]
    Malformed(String),
}

/// Check buffer lengths against the frame dimensions
pub(crate) fn check_frame(frame: &Frame) -> Result<(), EncodeError> {
    let pixels = frame.pixel_count();
    if frame.color.len() != pixels * 4 {
        return Err(EncodeError::ShapeMismatch(format!(
            "{}x{} frame has {} color bytes",
            frame.width,
            frame.height,
            frame.color.len()
        )));
    }
    if let Some(depth) = &frame.depth
        && depth.len() != pixels
    {
        return Err(EncodeError::ShapeMismatch(format!(
            "{}x{} frame has {} depth values",
            frame.width,
            frame.height,
            depth.len()
        )));
    }
    Ok(())
}

/// Encode a frame's color buffer alone
pub fn encode_color(frame: &Frame, format: EncodingFormat) -> Result<Bytes, EncodeError> {
    check_frame(frame)?;
    match format {
        EncodingFormat::RawRgba => Ok(Bytes::copy_from_slice(&frame.color)),
        EncodingFormat::TaggedNumericArray => {
            Ok(pack_color(frame.width, frame.height, &frame.color)?.into())
        }
        EncodingFormat::ImageContainer => encode_png(frame),
        EncodingFormat::MediaFrame => Err(EncodeError::NeedsTimestamp),
    }
}

/// Encode a frame's depth buffer alone; `None` when the frame has no depth
pub fn encode_depth(frame: &Frame, format: EncodingFormat) -> Result<Option<Bytes>, EncodeError> {
    check_frame(frame)?;
    let Some(depth) = &frame.depth else {
        return Ok(None);
    };
    match format {
        EncodingFormat::RawRgba => Ok(Some(tagged::depth_le_bytes(depth).freeze())),
        EncodingFormat::TaggedNumericArray => {
            Ok(Some(pack_depth(frame.width, frame.height, depth)?.into()))
        }
        other => Err(EncodeError::UnsupportedDepth(other)),
    }
}

/// Encode a mono frame.
///
/// Without depth this is the color encoding itself; with depth it is a map
/// `{"image": .., "depth": ..}`.
pub fn encode(frame: &Frame, format: EncodingFormat) -> Result<Bytes, EncodeError> {
    if frame.depth.is_none() {
        return encode_color(frame, format);
    }
    if format == EncodingFormat::MediaFrame {
        return Err(EncodeError::NeedsTimestamp);
    }
    let image = encode_color(frame, format)?;
    let depth = encode_depth(frame, format)?;
    let mut entries = vec![("image", image)];
    entries.extend(depth.map(|d| ("depth", d)));
    pack_map(&entries)
}

/// Encode a stereo pair as
/// `{"left_image", "right_image", "left_depth"?, "right_depth"?}`
pub fn encode_stereo(frames: &StereoFrames, format: EncodingFormat) -> Result<Bytes, EncodeError> {
    let (left, right) = (&frames.left, &frames.right);
    if (left.width, left.height) != (right.width, right.height)
        || left.depth.is_some() != right.depth.is_some()
    {
        return Err(EncodeError::ShapeMismatch(
            "stereo eyes differ in size or depth".into(),
        ));
    }

    let mut entries = vec![
        ("left_image", encode_color(left, format)?),
        ("right_image", encode_color(right, format)?),
    ];
    if let (Some(l), Some(r)) = (encode_depth(left, format)?, encode_depth(right, format)?) {
        entries.push(("left_depth", l));
        entries.push(("right_depth", r));
    }
    pack_map(&entries)
}

fn pack_map(entries: &[(&str, Bytes)]) -> Result<Bytes, EncodeError> {
    let payload: usize = entries.iter().map(|(_, v)| v.len() + 16).sum();
    let mut out = Vec::with_capacity(payload);
    rmp::encode::write_map_len(&mut out, entries.len() as u32).map_err(tagged::pack_err)?;
    for (key, value) in entries {
        rmp::encode::write_str(&mut out, key).map_err(tagged::pack_err)?;
        rmp::encode::write_bin(&mut out, value).map_err(tagged::pack_err)?;
    }
    Ok(out.into())
}

fn encode_png(frame: &Frame) -> Result<Bytes, EncodeError> {
    let mut out = Vec::new();
    image::codecs::png::PngEncoder::new(&mut out)
        .write_image(
            &frame.color,
            frame.width,
            frame.height,
            image::ExtendedColorType::Rgba8,
        )
        .map_err(|e| EncodeError::Image(e.to_string()))?;
    Ok(out.into())
}

/// Encoder bound to one configured format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameEncoder {
    format: EncodingFormat,
}

impl FrameEncoder {
    pub fn new(format: EncodingFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> EncodingFormat {
        self.format
    }

    pub fn encode(&self, frame: &Frame) -> Result<Bytes, EncodeError> {
        encode(frame, self.format)
    }

    pub fn encode_stereo(&self, frames: &StereoFrames) -> Result<Bytes, EncodeError> {
        encode_stereo(frames, self.format)
    }
}
