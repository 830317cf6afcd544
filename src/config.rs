use std::path::{Path, PathBuf};

use ini::{Ini, ParseOption};
use log::{debug, info};

use crate::{
    error::{Error, Result},
    roi::Roi,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Indices(Vec<usize>),
}

impl Selection {
    fn parse(key: &str, value: &str) -> Result<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("all") {
            return Ok(Selection::All);
        }
        let indices = value
            .split(',')
            .map(|part| {
                part.trim().parse::<usize>().map_err(|_| {
                    Error::Configuration(format!("{key}: expected `all` or indices, got {value:?}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Selection::Indices(indices))
    }

    pub fn resolve(&self, axis: &'static str, count: usize) -> Result<Vec<usize>> {
        match self {
            Selection::All => Ok((0..count).collect()),
            Selection::Indices(indices) => {
                if let Some(&bad) = indices.iter().find(|&&i| i >= count) {
                    return Err(Error::out_of_range(axis, bad, count));
                }
                Ok(indices.clone())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub series: usize,
    pub frames: Selection,
    pub channels: Selection,
    /// directory of the configuration file; outputs go below it
    pub path: PathBuf,
    pub name: String,
    pub image: PathBuf,
    pub roi: Option<Roi>,
    pub um_per_z: Option<f64>,
    pub um_per_pix: Option<f64>,
}

fn resolve_relative(base: &Path, value: &str) -> PathBuf {
    let p = PathBuf::from(value);
    if p.is_absolute() { p } else { base.join(p) }
}

impl ExportConfig {
    pub fn from_file(cfg_path: &Path) -> Result<Self> {
        info!("reading configuration file {cfg_path:?}");
        // backslashes are kept literally so Windows paths survive
        let opt = ParseOption {
            enabled_escape: false,
            ..ParseOption::default()
        };
        let ini = Ini::load_from_file_opt(cfg_path, opt)?;
        let base = cfg_path.parent().unwrap_or(Path::new("")).to_path_buf();
        let name = cfg_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_ini(&ini, base, name)
    }

    pub fn from_ini(ini: &Ini, base: PathBuf, name: String) -> Result<Self> {
        let data = ini
            .iter()
            .find(|(section, _)| section.is_some_and(|s| s.eq_ignore_ascii_case("DATA")))
            .map(|(_, props)| props)
            .ok_or_else(|| Error::Configuration("missing [DATA] section".to_string()))?;

        // keys are case-insensitive
        let get = |key: &str| {
            data.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.trim())
        };
        let require = |key: &str| {
            get(key).ok_or_else(|| Error::Configuration(format!("missing key DATA.{key}")))
        };
        let float = |key: &str| -> Result<Option<f64>> {
            get(key)
                .map(|v| {
                    v.parse::<f64>().map_err(|_| {
                        Error::Configuration(format!("DATA.{key}: expected a number, got {v:?}"))
                    })
                })
                .transpose()
        };

        let series = require("series")?;
        let series = series.parse().map_err(|_| {
            Error::Configuration(format!("DATA.series: expected an integer, got {series:?}"))
        })?;
        let mut frames = Selection::parse("DATA.frame", require("frame")?)?;
        let channels = Selection::parse("DATA.channel", require("channel")?)?;
        let image = resolve_relative(&base, require("image")?);

        let roi = match get("ROI") {
            Some(roi_path) => {
                let roi = Roi::from_file(&resolve_relative(&base, roi_path))?;
                if let Some(t) = roi.t_position {
                    debug!("ROI is bound to frame {t}, overriding frame selection");
                    frames = Selection::Indices(vec![t]);
                }
                Some(roi)
            }
            None => None,
        };

        Ok(ExportConfig {
            series,
            frames,
            channels,
            path: base,
            name,
            image,
            roi,
            um_per_z: float("um_per_z")?,
            um_per_pix: float("um_per_pix")?,
        })
    }
}
