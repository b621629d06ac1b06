//! Raw planar serialization of decoded pictures.
//!
//! A frame is written as luma rows followed by the blue and red chroma rows,
//! with stride padding dropped. No header or frame marker is emitted, so a
//! reader needs the dimensions out of band.

pub mod raw_file;

use std::{
    io::{self, Write},
    path::PathBuf,
};

use openh264::formats::YUVSource;
use thiserror::Error;

pub use raw_file::RawFileSink;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("could not open {path}: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("could not write frame: {0}")]
    Write(#[from] io::Error),
    #[error("chroma plane {found_w}x{found_h} is not half of luma {luma_w}x{luma_h}")]
    NotYuv420 {
        luma_w: usize,
        luma_h: usize,
        found_w: usize,
        found_h: usize,
    },
    #[error("{plane} plane holds {len} bytes, needs {needed}")]
    PlaneTooSmall {
        plane: &'static str,
        len: usize,
        needed: usize,
    },
    #[error("{plane} plane stride {stride} is narrower than its width {width}")]
    StrideTooSmall {
        plane: &'static str,
        stride: usize,
        width: usize,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct Plane<'a> {
    data: &'a [u8],
    width: usize,
    height: usize,
    stride: usize,
}

impl<'a> Plane<'a> {
    pub fn new(data: &'a [u8], width: usize, height: usize, stride: usize) -> Self {
        Self {
            data,
            width,
            height,
            stride,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    fn validate(&self, plane: &'static str) -> Result<(), OutputError> {
        if self.stride < self.width {
            return Err(OutputError::StrideTooSmall {
                plane,
                stride: self.stride,
                width: self.width,
            });
        }
        // The last row only needs `width` bytes.
        let needed = match self.height {
            0 => 0,
            h => (h - 1) * self.stride + self.width,
        };
        if self.data.len() < needed {
            return Err(OutputError::PlaneTooSmall {
                plane,
                len: self.data.len(),
                needed,
            });
        }
        Ok(())
    }

    fn rows(&self) -> impl Iterator<Item = &'a [u8]> {
        let Plane {
            data,
            width,
            stride,
            ..
        } = *self;
        (0..self.height).map(move |y| &data[y * stride..][..width])
    }
}

/// A 4:2:0 picture borrowed from its decoder.
#[derive(Debug, Clone, Copy)]
pub struct Picture<'a> {
    y: Plane<'a>,
    u: Plane<'a>,
    v: Plane<'a>,
}

impl<'a> Picture<'a> {
    pub fn new(y: Plane<'a>, u: Plane<'a>, v: Plane<'a>) -> Result<Self, OutputError> {
        for chroma in [&u, &v] {
            if chroma.width != y.width / 2 || chroma.height != y.height / 2 {
                return Err(OutputError::NotYuv420 {
                    luma_w: y.width,
                    luma_h: y.height,
                    found_w: chroma.width,
                    found_h: chroma.height,
                });
            }
        }
        y.validate("luma")?;
        u.validate("chroma-blue")?;
        v.validate("chroma-red")?;

        Ok(Self { y, u, v })
    }

    pub fn from_yuv(yuv: &'a impl YUVSource) -> Result<Self, OutputError> {
        let (width, height) = yuv.dimensions();
        let (y_stride, u_stride, v_stride) = yuv.strides();

        Self::new(
            Plane::new(yuv.y(), width, height, y_stride),
            Plane::new(yuv.u(), width / 2, height / 2, u_stride),
            Plane::new(yuv.v(), width / 2, height / 2, v_stride),
        )
    }

    pub fn width(&self) -> usize {
        self.y.width
    }

    pub fn height(&self) -> usize {
        self.y.height
    }

    /// Bytes one serialized frame occupies.
    pub fn frame_size(&self) -> usize {
        self.y.width * self.y.height + 2 * self.u.width * self.u.height
    }

    pub fn write_to(&self, out: &mut impl Write) -> io::Result<usize> {
        for plane in [&self.y, &self.u, &self.v] {
            for row in plane.rows() {
                out.write_all(row)?;
            }
        }
        Ok(self.frame_size())
    }
}

/// Destination for serialized frames.
pub trait FrameSink {
    /// Appends one frame and returns the number of bytes written.
    fn write_frame(&mut self, picture: &Picture<'_>) -> Result<usize, OutputError>;
}

impl FrameSink for Vec<u8> {
    fn write_frame(&mut self, picture: &Picture<'_>) -> Result<usize, OutputError> {
        self.reserve(picture.frame_size());
        Ok(picture.write_to(self)?)
    }
}
