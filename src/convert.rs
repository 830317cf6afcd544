use std::{
    fs,
    path::{Path, PathBuf},
    time::Instant,
};

use indicatif::{MultiProgress, ProgressBar};
use indicatif_log_bridge::LogWrapper;
use log::{debug, error, info};

use crate::{
    assemble::assemble_and_normalize,
    config::{ExportConfig, Selection},
    encode::encode_volume,
    error::{Error, Result},
    read::open_source,
    source::ImageSource,
    write::write_volume,
};

/// Logger and progress bars for one run, shared by every configuration file.
pub struct Session {
    multi_progress: MultiProgress,
    started: Instant,
    succeeded: usize,
    failed: usize,
}

impl Session {
    pub fn start() -> std::result::Result<Self, log::SetLoggerError> {
        let env = env_logger::Env::default().filter_or("RUST_LOG", "info");
        let logger = env_logger::Builder::from_env(env).build();
        let level = logger.filter();
        let multi_progress = MultiProgress::new();
        LogWrapper::new(multi_progress.clone(), logger).try_init()?;
        log::set_max_level(level);
        Ok(Self::with_progress(multi_progress))
    }

    pub fn with_progress(multi_progress: MultiProgress) -> Self {
        Self {
            multi_progress,
            started: Instant::now(),
            succeeded: 0,
            failed: 0,
        }
    }

    pub fn run(&mut self, cfg_path: &Path) -> bool {
        match ExportConfig::from_file(cfg_path)
            .and_then(|cfg| export(&cfg, &self.multi_progress))
        {
            Ok(written) => {
                info!("{cfg_path:?}: wrote {} volumes", written.len());
                self.succeeded += 1;
                true
            }
            Err(e) => {
                error!("{cfg_path:?}: export failed: {e}");
                self.failed += 1;
                false
            }
        }
    }

    // returns the number of failed configuration files
    pub fn close(self) -> usize {
        info!(
            "session done in {:?}: {} exported, {} failed",
            self.started.elapsed(),
            self.succeeded,
            self.failed
        );
        self.failed
    }
}

fn channel_dir(base: &Path, channel: usize) -> PathBuf {
    base.join("openvdb").join(format!("ch{channel:01}"))
}

pub fn output_path(base: &Path, channel: usize, frame: usize) -> PathBuf {
    channel_dir(base, channel).join(format!("vol_ch{channel:01}_fr{frame:03}.vdb"))
}

pub fn export(cfg: &ExportConfig, multi_progress: &MultiProgress) -> Result<Vec<PathBuf>> {
    let mut source = open_source(&cfg.image, cfg.series)?;
    export_source(cfg, source.as_mut(), multi_progress)
}

pub fn export_source(
    cfg: &ExportConfig,
    source: &mut dyn ImageSource,
    multi_progress: &MultiProgress,
) -> Result<Vec<PathBuf>> {
    let t0 = Instant::now();
    let geometry = source.geometry().clone();
    info!(
        "{}: {}x{} px, {} z-slices, {} frames, {} channels",
        cfg.name, geometry.width, geometry.height, geometry.z_slices, geometry.frames, geometry.channels
    );

    let channels = cfg.channels.resolve("channel", geometry.channels)?;
    let frames = cfg.frames.resolve("frame", geometry.frames)?;
    let um_per_pix = cfg.um_per_pix.unwrap_or(geometry.um_per_pix);
    let um_per_z = cfg.um_per_z.unwrap_or(geometry.um_per_z);
    debug!("frames {frames:?}, channels {channels:?}, spacing {um_per_pix} x {um_per_z} um");

    // the whole timeseries is normalized together
    let all_frames = Selection::All.resolve("frame", geometry.frames)?;
    let mut written = Vec::new();
    for ch in channels {
        let t_ch = Instant::now();
        let planes = (all_frames.len() * geometry.z_slices) as u64;
        let progress = multi_progress.add(ProgressBar::new(planes));

        let volume = assemble_and_normalize(
            source,
            &all_frames,
            cfg.roi.as_ref(),
            ch,
            &progress,
        );
        progress.finish();
        multi_progress.remove(&progress);
        let volume = volume?;

        let export_dir = channel_dir(&cfg.path, ch);
        fs::create_dir_all(&export_dir).map_err(|source| Error::PathUnwritable {
            path: export_dir.clone(),
            source,
        })?;

        for &fr in &frames {
            let image = encode_volume(volume.frame(fr)?, um_per_pix, um_per_z)?;
            let dest = output_path(&cfg.path, ch, fr);
            write_volume(&image, &dest)?;
            debug!("created {dest:?}");
            written.push(dest);
        }
        info!("channel {ch} done in {:?}", t_ch.elapsed());
    }

    info!("{}: export done in {:?}", cfg.name, t0.elapsed());
    Ok(written)
}
