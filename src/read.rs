use std::{fs::File, io::BufReader, path::Path};

use log::{debug, info, warn};
use mrc::MrcMmap;
use ndarray::Array2;
use tiff::{
    decoder::{Decoder, DecodingResult, ifd::Value},
    tags::Tag,
};

use crate::{
    error::{Error, Result},
    source::{ImageSource, PlaneIndex, SeriesGeometry},
};

pub fn open_source(path: &Path, series: usize) -> Result<Box<dyn ImageSource>> {
    if series != 0 {
        return Err(Error::Configuration(format!(
            "{path:?} holds a single series, series {series} requested"
        )));
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("mrc") => Ok(Box::new(MrcStack::open(path)?)),
        Some("tif" | "tiff") => Ok(Box::new(TiffStack::open(path)?)),
        _ => Err(Error::Configuration(format!(
            "unsupported image format: {path:?}"
        ))),
    }
}

/// Spacing in µm assumed for MRC stacks, overridden by `DATA.um_per_pix` / `DATA.um_per_z`.
pub const MRC_DEFAULT_SPACING: f64 = 1.0;

// one channel, one frame; i16 samples are shifted into u16 so ordering is preserved
pub struct MrcStack {
    mmap: MrcMmap,
    geometry: SeriesGeometry,
}

impl MrcStack {
    pub fn open(path: &Path) -> Result<Self> {
        let mmap = MrcMmap::open(path)?;
        let (nx, ny, nz) = mmap.read_view()?.dimensions();
        info!("MRC dimensions: {nz}x{ny}x{nx}");
        warn!(
            "{path:?}: voxel spacing is not read from MRC headers, assuming {MRC_DEFAULT_SPACING} um; \
             set DATA.um_per_pix and DATA.um_per_z to override"
        );
        Ok(Self {
            mmap,
            geometry: mrc_geometry(nx, ny, nz),
        })
    }
}

fn mrc_geometry(nx: usize, ny: usize, nz: usize) -> SeriesGeometry {
    SeriesGeometry {
        width: nx,
        height: ny,
        z_slices: nz,
        frames: 1,
        channels: 1,
        um_per_pix: MRC_DEFAULT_SPACING,
        um_per_z: MRC_DEFAULT_SPACING,
    }
}

impl ImageSource for MrcStack {
    fn geometry(&self) -> &SeriesGeometry {
        &self.geometry
    }

    fn plane(&mut self, index: PlaneIndex) -> Result<Array2<u16>> {
        self.geometry.check(index)?;
        let (nx, ny) = (self.geometry.width, self.geometry.height);

        let view = self.mmap.read_view()?;
        let ints = view.data.as_i16_slice()?;
        let start = index.z * nx * ny;
        let slice = ints
            .get(start..start + nx * ny)
            .ok_or(mrc::Error::InvalidDimensions)?;

        let samples = slice.iter().map(|&v| (v as u16) ^ 0x8000).collect();
        Array2::from_shape_vec((ny, nx), samples)
            .map_err(|e| Error::InvalidFormat(format!("MRC slice {}: {e}", index.z)))
    }
}

// ImageJ hyperstacks are CZT, channel fastest; without a description every page is a z-slice
pub struct TiffStack {
    decoder: Decoder<BufReader<File>>,
    geometry: SeriesGeometry,
}

#[derive(Debug, Default, PartialEq)]
struct HyperstackInfo {
    channels: Option<usize>,
    slices: Option<usize>,
    frames: Option<usize>,
    spacing: Option<f64>,
}

fn parse_imagej_description(text: &str) -> Option<HyperstackInfo> {
    if !text.starts_with("ImageJ=") {
        return None;
    }
    let mut info = HyperstackInfo::default();
    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "channels" => info.channels = value.parse().ok(),
            "slices" => info.slices = value.parse().ok(),
            "frames" => info.frames = value.parse().ok(),
            "spacing" => info.spacing = value.parse().ok(),
            _ => {}
        }
    }
    Some(info)
}

impl TiffStack {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut decoder = Decoder::new(BufReader::new(file))?;

        let (width, height) = decoder.dimensions()?;
        let description = decoder.get_tag_ascii_string(Tag::ImageDescription).ok();
        let um_per_pix = match decoder.find_tag(Tag::XResolution)? {
            Some(Value::Rational(n, d)) if n > 0 && d > 0 => f64::from(d) / f64::from(n),
            _ => 1.0,
        };

        let mut pages = 1;
        while decoder.more_images() {
            decoder.next_image()?;
            pages += 1;
        }
        decoder.seek_to_image(0)?;

        let info = description
            .as_deref()
            .and_then(parse_imagej_description)
            .unwrap_or_default();
        let channels = info.channels.unwrap_or(1);
        let frames = info.frames.unwrap_or(1);
        let z_slices = info.slices.unwrap_or(pages / (channels * frames).max(1));
        if channels * frames * z_slices != pages {
            return Err(Error::InvalidFormat(format!(
                "{path:?}: {pages} pages do not match {channels} channels x {z_slices} slices x {frames} frames"
            )));
        }
        debug!("TIFF stack {path:?}: c={channels} z={z_slices} t={frames}, {width}x{height}");

        Ok(Self {
            decoder,
            geometry: SeriesGeometry {
                width: width as usize,
                height: height as usize,
                z_slices,
                frames,
                channels,
                um_per_pix,
                um_per_z: info.spacing.unwrap_or(1.0),
            },
        })
    }
}

impl ImageSource for TiffStack {
    fn geometry(&self) -> &SeriesGeometry {
        &self.geometry
    }

    fn plane(&mut self, index: PlaneIndex) -> Result<Array2<u16>> {
        self.geometry.check(index)?;
        let g = &self.geometry;
        let page = (index.frame * g.z_slices + index.z) * g.channels + index.channel;
        let shape = (g.height, g.width);

        self.decoder.seek_to_image(page)?;
        let samples = match self.decoder.read_image()? {
            DecodingResult::U16(buf) => buf,
            DecodingResult::U8(buf) => buf.into_iter().map(u16::from).collect(),
            _ => {
                return Err(Error::InvalidFormat(format!(
                    "page {page}: only 8 and 16 bit grayscale is supported"
                )));
            }
        };
        Array2::from_shape_vec(shape, samples)
            .map_err(|e| Error::InvalidFormat(format!("page {page}: {e}")))
    }
}
