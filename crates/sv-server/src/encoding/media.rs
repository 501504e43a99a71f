//! Timestamped media-frame units for continuous streaming
//!
//! A media frame is a fixed little-endian header followed by the RGBA
//! payload:
//!
//! | bytes | field |
//! |-------|-------|
//! | 4 | magic `SVMF` |
//! | 1 | version |
//! | 1 | layout (0 mono, 1 side-by-side) |
//! | 1 | status (0 ok, 1 error) |
//! | 4 | width |
//! | 4 | height |
//! | 8 | presentation timestamp, 90 kHz ticks |
//! | 4 | frame duration, 90 kHz ticks |
//! | 4 | payload length |

use bytes::{Buf, BufMut, Bytes, BytesMut};
use sv_core::Frame;

use super::EncodeError;

/// Media clock rate in ticks per second
pub const MEDIA_CLOCK_RATE: u64 = 90_000;

const MAGIC: &[u8; 4] = b"SVMF";
const VERSION: u8 = 1;

/// Size of the fixed header preceding the payload
pub const MEDIA_HEADER_LEN: usize = 31;

/// How eyes are packed into the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLayout {
    Mono,
    /// Left eye in the left half, right eye in the right half
    SideBySide,
}

/// Whether the payload holds a rendered image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Ok,
    /// Rendering failed; the payload is empty
    Error,
}

/// One unit of a continuous stream
#[derive(Debug, Clone, PartialEq)]
pub struct MediaFrame {
    pub pts: u64,
    pub duration: u32,
    pub width: u32,
    pub height: u32,
    pub layout: FrameLayout,
    pub status: FrameStatus,
    /// RGBA8 rows, top row first
    pub data: Bytes,
}

impl MediaFrame {
    /// Wrap a mono frame's color buffer
    pub fn from_frame(frame: &Frame, pts: u64, duration: u32) -> Result<Self, EncodeError> {
        super::check_frame(frame)?;
        Ok(Self {
            pts,
            duration,
            width: frame.width,
            height: frame.height,
            layout: FrameLayout::Mono,
            status: FrameStatus::Ok,
            data: Bytes::copy_from_slice(&frame.color),
        })
    }

    /// Pack a stereo pair horizontally into one double-width image
    pub fn side_by_side(
        left: &Frame,
        right: &Frame,
        pts: u64,
        duration: u32,
    ) -> Result<Self, EncodeError> {
        super::check_frame(left)?;
        super::check_frame(right)?;
        if (left.width, left.height) != (right.width, right.height) {
            return Err(EncodeError::ShapeMismatch(format!(
                "left eye is {}x{}, right eye is {}x{}",
                left.width, left.height, right.width, right.height
            )));
        }

        let row = left.width as usize * 4;
        let mut data = BytesMut::with_capacity(left.color.len() * 2);
        for (l, r) in left.color.chunks_exact(row).zip(right.color.chunks_exact(row)) {
            data.put_slice(l);
            data.put_slice(r);
        }

        Ok(Self {
            pts,
            duration,
            width: left.width * 2,
            height: left.height,
            layout: FrameLayout::SideBySide,
            status: FrameStatus::Ok,
            data: data.freeze(),
        })
    }

    /// Empty frame marking a failed render at `pts`
    pub fn error(pts: u64, duration: u32) -> Self {
        Self {
            pts,
            duration,
            width: 0,
            height: 0,
            layout: FrameLayout::Mono,
            status: FrameStatus::Error,
            data: Bytes::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == FrameStatus::Error
    }

    /// Serialize header and payload
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(MEDIA_HEADER_LEN + self.data.len());
        out.put_slice(MAGIC);
        out.put_u8(VERSION);
        out.put_u8(match self.layout {
            FrameLayout::Mono => 0,
            FrameLayout::SideBySide => 1,
        });
        out.put_u8(match self.status {
            FrameStatus::Ok => 0,
            FrameStatus::Error => 1,
        });
        out.put_u32_le(self.width);
        out.put_u32_le(self.height);
        out.put_u64_le(self.pts);
        out.put_u32_le(self.duration);
        out.put_u32_le(self.data.len() as u32);
        out.put_slice(&self.data);
        out.freeze()
    }

    /// Parse bytes produced by [`Self::to_bytes`]
    pub fn parse(mut buf: Bytes) -> Result<Self, EncodeError> {
        if buf.len() < MEDIA_HEADER_LEN {
            return Err(EncodeError::Malformed(format!(
                "media frame has {} bytes, header needs {MEDIA_HEADER_LEN}",
                buf.len()
            )));
        }
        if &buf[..4] != MAGIC {
            return Err(EncodeError::Malformed("bad media frame magic".into()));
        }
        buf.advance(4);
        let version = buf.get_u8();
        if version != VERSION {
            return Err(EncodeError::Malformed(format!(
                "unsupported media frame version {version}"
            )));
        }
        let layout = match buf.get_u8() {
            0 => FrameLayout::Mono,
            1 => FrameLayout::SideBySide,
            other => {
                return Err(EncodeError::Malformed(format!("unknown layout {other}")));
            }
        };
        let status = match buf.get_u8() {
            0 => FrameStatus::Ok,
            1 => FrameStatus::Error,
            other => {
                return Err(EncodeError::Malformed(format!("unknown status {other}")));
            }
        };
        let width = buf.get_u32_le();
        let height = buf.get_u32_le();
        let pts = buf.get_u64_le();
        let duration = buf.get_u32_le();
        let len = buf.get_u32_le() as usize;
        if buf.remaining() != len {
            return Err(EncodeError::Malformed(format!(
                "payload length {len} does not match {} remaining bytes",
                buf.remaining()
            )));
        }

        Ok(Self {
            pts,
            duration,
            width,
            height,
            layout,
            status,
            data: buf,
        })
    }
}

/// Frame duration in media clock ticks for a given rate
pub fn frame_duration(fps: u32) -> u32 {
    (MEDIA_CLOCK_RATE / u64::from(fps.max(1))) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use sv_core::Eye;

    fn solid(width: u32, height: u32, value: u8, eye: Eye) -> Frame {
        let mut frame = Frame::new(width, height, eye, false);
        frame.color.fill(value);
        frame
    }

    #[test]
    fn test_side_by_side_rows() {
        let left = solid(2, 2, 1, Eye::Left);
        let right = solid(2, 2, 9, Eye::Right);
        let media = MediaFrame::side_by_side(&left, &right, 3000, 3000).unwrap();

        assert_eq!(media.width, 4);
        assert_eq!(media.height, 2);
        assert_eq!(media.layout, FrameLayout::SideBySide);
        let row = 4 * 4;
        for y in 0..2 {
            let line = &media.data[y * row..(y + 1) * row];
            assert!(line[..8].iter().all(|&b| b == 1));
            assert!(line[8..].iter().all(|&b| b == 9));
        }
    }

    #[test]
    fn test_side_by_side_rejects_mismatched_eyes() {
        let left = solid(2, 2, 1, Eye::Left);
        let right = solid(3, 2, 1, Eye::Right);
        assert!(matches!(
            MediaFrame::side_by_side(&left, &right, 0, 0),
            Err(EncodeError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_wire_header() {
        let frame = solid(2, 1, 7, Eye::Mono);
        let bytes = MediaFrame::from_frame(&frame, 6000, 3000).unwrap().to_bytes();
        assert_eq!(bytes.len(), MEDIA_HEADER_LEN + 8);
        assert_eq!(&bytes[..4], b"SVMF");
        assert_eq!(&bytes[15..23], &6000u64.to_le_bytes());

        let parsed = MediaFrame::parse(bytes).unwrap();
        assert_eq!(parsed.pts, 6000);
        assert_eq!(parsed.duration, 3000);
        assert_eq!(parsed.data.as_ref(), frame.color.as_slice());
    }

    #[test]
    fn test_error_frame_is_marked_and_empty() {
        let parsed = MediaFrame::parse(MediaFrame::error(42, 3000).to_bytes()).unwrap();
        assert!(parsed.is_error());
        assert_eq!(parsed.pts, 42);
        assert!(parsed.data.is_empty());
    }

    #[test]
    fn test_parse_rejects_truncated() {
        let bytes = MediaFrame::error(0, 0).to_bytes();
        assert!(matches!(
            MediaFrame::parse(bytes.slice(..10)),
            Err(EncodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_frame_duration() {
        assert_eq!(frame_duration(30), 3000);
        assert_eq!(frame_duration(90), 1000);
    }
}
