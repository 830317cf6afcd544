use std::{fs, path::Path};

use byteorder::{BigEndian, ByteOrder};
use log::debug;

use crate::error::{Error, Result};

const MAGIC: &[u8; 4] = b"Iout";
const HEADER_SIZE: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct Roi {
    pub left: f64,
    pub right: f64,
    pub top: f64,
    pub bottom: f64,
    /// frame the ROI is bound to, if any
    pub t_position: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crop {
    pub x0: usize,
    pub y0: usize,
    pub width: usize,
    pub height: usize,
}

impl Crop {
    pub fn full(width: usize, height: usize) -> Self {
        Self {
            x0: 0,
            y0: 0,
            width,
            height,
        }
    }

    // rejected, not clamped, when it reaches outside the frame
    pub fn from_roi(roi: Option<&Roi>, frame_width: usize, frame_height: usize) -> Result<Self> {
        let Some(roi) = roi else {
            return Ok(Self::full(frame_width, frame_height));
        };

        let width = (roi.right - roi.left).abs().trunc() as i64;
        let height = (roi.top - roi.bottom).abs().trunc() as i64;
        if width <= 0 || height <= 0 {
            return Err(Error::InvalidRegion(format!(
                "ROI has non-positive size {width}x{height}"
            )));
        }

        let x0 = roi.left.trunc() as i64;
        let y0 = roi.top.trunc() as i64;
        if x0 < 0 || y0 < 0 || x0 + width > frame_width as i64 || y0 + height > frame_height as i64
        {
            return Err(Error::InvalidRegion(format!(
                "ROI [{x0}, {}) x [{y0}, {}) exceeds frame {frame_width}x{frame_height}",
                x0 + width,
                y0 + height,
            )));
        }

        Ok(Self {
            x0: x0 as usize,
            y0: y0 as usize,
            width: width as usize,
            height: height as usize,
        })
    }

    pub fn x1(&self) -> usize {
        self.x0 + self.width
    }

    pub fn y1(&self) -> usize {
        self.y0 + self.height
    }
}

impl Roi {
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let roi = Self::from_bytes(&bytes)?;
        debug!("loaded ROI {roi:?} from {path:?}");
        Ok(roi)
    }

    // only the integer bounding box and the time position are read
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE || &bytes[0..4] != MAGIC {
            return Err(Error::InvalidFormat("not an ImageJ ROI".to_string()));
        }
        let version = BigEndian::read_i16(&bytes[4..6]);
        let top = BigEndian::read_i16(&bytes[8..10]);
        let left = BigEndian::read_i16(&bytes[10..12]);
        let bottom = BigEndian::read_i16(&bytes[12..14]);
        let right = BigEndian::read_i16(&bytes[14..16]);

        let mut roi = Roi {
            left: f64::from(left),
            right: f64::from(right),
            top: f64::from(top),
            bottom: f64::from(bottom),
            t_position: None,
        };

        let header2 = BigEndian::read_i32(&bytes[60..64]);
        if version >= 218 && header2 > 0 {
            let offset = header2 as usize;
            if let Some(h2) = bytes.get(offset..offset + 16) {
                // 0 means unset
                let t = BigEndian::read_i32(&h2[12..16]);
                if t > 0 {
                    roi.t_position = Some(t as usize);
                }
            }
        }

        Ok(roi)
    }
}
