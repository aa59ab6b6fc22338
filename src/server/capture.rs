//! Frame acquisition (spec.md §4.F capture task). Camera and video-file
//! acquisition are explicit external collaborators (spec.md §1 "Out of
//! scope") — both sources here pull already-decoded raw RGB8 rasters rather
//! than doing any decoding themselves.

use std::io::Read;
use std::path::Path;
use std::time::{Duration, Instant};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{Error, Result};
use crate::raster::Raster;

/// Pull interface for one frame source. `pull` returns `None` once the
/// source is exhausted (a non-looping file reaching its end); a live camera
/// never returns `None` on its own.
pub trait FrameSource: Send {
    fn pull(&mut self) -> Option<Raster>;
}

/// Wraps an externally supplied pull callback — the camera acquisition
/// itself lives outside this crate (spec.md §1).
pub struct CameraSource<F: FnMut() -> Option<Raster> + Send> {
    pull_fn: F,
}

impl<F: FnMut() -> Option<Raster> + Send> CameraSource<F> {
    pub fn new(pull_fn: F) -> Self {
        Self { pull_fn }
    }
}

impl<F: FnMut() -> Option<Raster> + Send> FrameSource for CameraSource<F> {
    fn pull(&mut self) -> Option<Raster> {
        (self.pull_fn)()
    }
}

/// A fixed sequence of rasters read once from a raw frame container, paced
/// to a configured frame rate and optionally looped (spec.md §4.F, §6).
pub struct FileSource {
    frames: Vec<Raster>,
    index: usize,
    loop_playback: bool,
    frame_period: Duration,
    last_pull: Option<Instant>,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>, fps: f64, loop_playback: bool) -> Result<Self> {
        let (_width, _height, frames) = read_raw_frames(path)?;
        if frames.is_empty() {
            return Err(Error::EmptyInput);
        }
        Ok(Self {
            frames,
            index: 0,
            loop_playback,
            frame_period: Duration::from_secs_f64(1.0 / fps.max(1e-6)),
            last_pull: None,
        })
    }
}

impl FrameSource for FileSource {
    fn pull(&mut self) -> Option<Raster> {
        if self.index >= self.frames.len() {
            if self.loop_playback {
                self.index = 0;
            } else {
                return None;
            }
        }

        if let Some(last) = self.last_pull {
            let elapsed = last.elapsed();
            if elapsed < self.frame_period {
                std::thread::sleep(self.frame_period - elapsed);
            }
        }
        self.last_pull = Some(Instant::now());

        let frame = self.frames[self.index].clone();
        self.index += 1;
        Some(frame)
    }
}

/// Minimal raw-frame container: `width:u32, height:u32, frame_count:u32`,
/// followed by `frame_count` back-to-back RGB8 planes. There is no codec
/// here by design — image decoding is an external collaborator (spec.md
/// §1) — this only exists so the file-backed path has something concrete
/// to pull from.
fn read_raw_frames(path: impl AsRef<Path>) -> Result<(u32, u32, Vec<Raster>)> {
    let mut file = std::fs::File::open(path)?;
    let width = file.read_u32::<LittleEndian>()?;
    let height = file.read_u32::<LittleEndian>()?;
    let frame_count = file.read_u32::<LittleEndian>()?;

    let frame_bytes = width as usize * height as usize * 3;
    let mut frames = Vec::with_capacity(frame_count as usize);
    for _ in 0..frame_count {
        let mut data = vec![0u8; frame_bytes];
        file.read_exact(&mut data)?;
        frames.push(Raster::new(width, height, data));
    }
    Ok((width, height, frames))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_source_forwards_pull_results() {
        let mut calls = 0;
        let mut source = CameraSource::new(move || {
            calls += 1;
            Some(Raster::filled(2, 2, (1, 2, 3)))
        });
        let frame = source.pull().unwrap();
        assert_eq!(frame.pixel(0, 0), (1, 2, 3));
    }

    #[test]
    fn file_source_loops_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.bin");
        {
            use byteorder::WriteBytesExt;
            use std::io::Write;
            let mut f = std::fs::File::create(&path).unwrap();
            f.write_u32::<LittleEndian>(2).unwrap();
            f.write_u32::<LittleEndian>(2).unwrap();
            f.write_u32::<LittleEndian>(1).unwrap();
            f.write_all(&[9u8; 12]).unwrap();
        }
        let mut source = FileSource::open(&path, 1_000.0, true).unwrap();
        assert!(source.pull().is_some());
        assert!(source.pull().is_some(), "looping source must not exhaust");
    }

    #[test]
    fn file_source_stops_without_loop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.bin");
        {
            use byteorder::WriteBytesExt;
            use std::io::Write;
            let mut f = std::fs::File::create(&path).unwrap();
            f.write_u32::<LittleEndian>(1).unwrap();
            f.write_u32::<LittleEndian>(1).unwrap();
            f.write_u32::<LittleEndian>(1).unwrap();
            f.write_all(&[1u8; 3]).unwrap();
        }
        let mut source = FileSource::open(&path, 1_000.0, false).unwrap();
        assert!(source.pull().is_some());
        assert!(source.pull().is_none());
    }
}
