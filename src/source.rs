use ndarray::{Array2, Array5, s};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesGeometry {
    pub width: usize,
    pub height: usize,
    pub z_slices: usize,
    pub frames: usize,
    pub channels: usize,
    pub um_per_pix: f64,
    pub um_per_z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneIndex {
    pub channel: usize,
    pub z: usize,
    pub frame: usize,
}

impl SeriesGeometry {
    pub fn check(&self, index: PlaneIndex) -> Result<()> {
        if index.channel >= self.channels {
            return Err(Error::out_of_range("channel", index.channel, self.channels));
        }
        if index.z >= self.z_slices {
            return Err(Error::out_of_range("z", index.z, self.z_slices));
        }
        if index.frame >= self.frames {
            return Err(Error::out_of_range("frame", index.frame, self.frames));
        }
        Ok(())
    }
}

/// Planes come back shaped `(height, width)`, samples widened to `u16`.
pub trait ImageSource {
    fn geometry(&self) -> &SeriesGeometry;

    fn plane(&mut self, index: PlaneIndex) -> Result<Array2<u16>>;
}

// axes (channel, frame, z, y, x)
#[derive(Debug, Clone)]
pub struct ArraySource {
    data: Array5<u16>,
    geometry: SeriesGeometry,
}

impl ArraySource {
    pub fn new(data: Array5<u16>, um_per_pix: f64, um_per_z: f64) -> Self {
        let (channels, frames, z_slices, height, width) = data.dim();
        Self {
            data,
            geometry: SeriesGeometry {
                width,
                height,
                z_slices,
                frames,
                channels,
                um_per_pix,
                um_per_z,
            },
        }
    }
}

impl ImageSource for ArraySource {
    fn geometry(&self) -> &SeriesGeometry {
        &self.geometry
    }

    fn plane(&mut self, index: PlaneIndex) -> Result<Array2<u16>> {
        self.geometry.check(index)?;
        Ok(self
            .data
            .slice(s![index.channel, index.frame, index.z, .., ..])
            .to_owned())
    }
}
