//! Render output and render job descriptions

use serde::{Deserialize, Serialize};

use crate::pose::Pose;

/// Which eye a frame was rendered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Eye {
    #[default]
    Mono,
    Left,
    Right,
}

impl Eye {
    /// Signed eye offset for a stereo pair with the given separation
    pub fn offset(&self, eye_separation: f32) -> f32 {
        match self {
            Eye::Mono => 0.0,
            Eye::Left => -eye_separation / 2.0,
            Eye::Right => eye_separation / 2.0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Eye::Mono => "mono",
            Eye::Left => "left",
            Eye::Right => "right",
        }
    }
}

/// One rendered frame: RGBA8 color plus optional linear depth in meters.
///
/// Both buffers are row-major, top row first.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub color: Vec<u8>,
    pub depth: Option<Vec<f32>>,
    pub eye: Eye,
}

/// Frame construction errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("Color buffer has {actual} bytes, expected {expected}")]
    ColorSize { expected: usize, actual: usize },
    #[error("Depth buffer has {actual} values, expected {expected}")]
    DepthSize { expected: usize, actual: usize },
    #[error("Frame dimensions must be non-zero, got {0}x{1}")]
    ZeroSize(u32, u32),
}

impl Frame {
    /// Zeroed frame of the given size
    pub fn new(width: u32, height: u32, eye: Eye, with_depth: bool) -> Self {
        let pixels = width as usize * height as usize;
        Self {
            width,
            height,
            color: vec![0; pixels * 4],
            depth: with_depth.then(|| vec![0.0; pixels]),
            eye,
        }
    }

    /// Wrap existing buffers, checking their sizes
    pub fn from_buffers(
        width: u32,
        height: u32,
        color: Vec<u8>,
        depth: Option<Vec<f32>>,
        eye: Eye,
    ) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::ZeroSize(width, height));
        }
        let pixels = width as usize * height as usize;
        if color.len() != pixels * 4 {
            return Err(FrameError::ColorSize {
                expected: pixels * 4,
                actual: color.len(),
            });
        }
        if let Some(depth) = &depth
            && depth.len() != pixels
        {
            return Err(FrameError::DepthSize {
                expected: pixels,
                actual: depth.len(),
            });
        }
        Ok(Self {
            width,
            height,
            color,
            depth,
            eye,
        })
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// RGBA of one pixel
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        self.color.get(i..i + 4).map(|p| [p[0], p[1], p[2], p[3]])
    }

    /// Depth of one pixel (0 for background)
    pub fn depth_at(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let depth = self.depth.as_ref()?;
        depth
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// True when dimensions match, so the buffers can be reused
    pub fn same_shape(&self, width: u32, height: u32, with_depth: bool) -> bool {
        self.width == width && self.height == height && self.depth.is_some() == with_depth
    }

    /// Give up the buffers, e.g. to hand them back to a pool
    pub fn into_buffers(self) -> (Vec<u8>, Option<Vec<f32>>) {
        (self.color, self.depth)
    }
}

/// A request to render one eye at a given pose. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderJob {
    pose: Pose,
    eye: Eye,
    eye_offset: f32,
    with_depth: bool,
}

impl RenderJob {
    pub fn new(pose: Pose, eye: Eye, eye_offset: f32) -> Self {
        Self {
            pose,
            eye,
            eye_offset,
            with_depth: false,
        }
    }

    /// Mono job with no eye offset
    pub fn mono(pose: Pose) -> Self {
        Self::new(pose, Eye::Mono, 0.0)
    }

    /// One eye of a stereo pair
    pub fn for_eye(pose: Pose, eye: Eye, eye_separation: f32) -> Self {
        Self::new(pose, eye, eye.offset(eye_separation))
    }

    pub fn with_depth(self, with_depth: bool) -> Self {
        Self { with_depth, ..self }
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    pub fn eye(&self) -> Eye {
        self.eye
    }

    pub fn eye_offset(&self) -> f32 {
        self.eye_offset
    }

    pub fn wants_depth(&self) -> bool {
        self.with_depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_frame_sizes() {
        let frame = Frame::new(4, 3, Eye::Left, true);
        assert_eq!(frame.color.len(), 4 * 3 * 4);
        assert_eq!(frame.depth.as_ref().map(Vec::len), Some(12));
        assert!(frame.same_shape(4, 3, true));
        assert!(!frame.same_shape(4, 3, false));
    }

    #[test]
    fn test_from_buffers_validates() {
        assert!(Frame::from_buffers(2, 2, vec![0; 16], None, Eye::Mono).is_ok());
        assert_eq!(
            Frame::from_buffers(2, 2, vec![0; 15], None, Eye::Mono),
            Err(FrameError::ColorSize {
                expected: 16,
                actual: 15
            })
        );
        assert_eq!(
            Frame::from_buffers(2, 2, vec![0; 16], Some(vec![0.0; 3]), Eye::Mono),
            Err(FrameError::DepthSize {
                expected: 4,
                actual: 3
            })
        );
        assert_eq!(
            Frame::from_buffers(0, 2, vec![], None, Eye::Mono),
            Err(FrameError::ZeroSize(0, 2))
        );
    }

    #[test]
    fn test_pixel_access() {
        let mut color = vec![0; 2 * 2 * 4];
        color[12..16].copy_from_slice(&[1, 2, 3, 4]);
        let frame = Frame::from_buffers(2, 2, color, Some(vec![0.0, 0.0, 0.0, 2.5]), Eye::Mono)
            .unwrap();
        assert_eq!(frame.pixel(1, 1), Some([1, 2, 3, 4]));
        assert_eq!(frame.depth_at(1, 1), Some(2.5));
        assert_eq!(frame.pixel(2, 0), None);
    }

    #[test]
    fn test_eye_offsets() {
        assert_eq!(Eye::Left.offset(0.06), -0.03);
        assert_eq!(Eye::Right.offset(0.06), 0.03);
        assert_eq!(Eye::Mono.offset(0.06), 0.0);

        let job = RenderJob::for_eye(Pose::IDENTITY, Eye::Right, 0.06).with_depth(true);
        assert_eq!(job.eye(), Eye::Right);
        assert_eq!(job.eye_offset(), 0.03);
        assert!(job.wants_depth());
    }
}
