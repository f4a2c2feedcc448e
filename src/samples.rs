//! Sample assets.
//!
//! Decoding is delegated to a [`SampleLoader`]. The controller ships each
//! decoded [`SampleAsset`] to the rendering context over the bridge, where it
//! lands in the processor's [`SampleBank`].

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use lewton::inside_ogg::OggStreamReader;
use lewton::VorbisError;
use thiserror::Error;
use tracing::debug;

/// Errors raised while loading a sample
#[derive(Error, Debug)]
pub enum SampleError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("vorbis decode failed: {0}")]
    Vorbis(#[from] VorbisError),

    #[error("sample `{0}` not found")]
    NotFound(String),
}

/// A decoded sample, interleaved.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleAsset {
    pub name: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub frames: Box<[f32]>,
}

impl SampleAsset {
    pub fn new(name: impl Into<String>, sample_rate: u32, channels: u16, frames: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            sample_rate,
            channels: channels.max(1),
            frames: frames.into_boxed_slice(),
        }
    }

    /// Number of frames (samples per channel)
    pub fn len(&self) -> usize {
        self.frames.len() / self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// One channel of one frame, `None` past either end
    #[inline]
    pub fn frame(&self, index: usize, channel: u16) -> Option<f32> {
        if channel >= self.channels {
            return None;
        }
        let at = index.checked_mul(self.channels as usize)?.checked_add(channel as usize)?;
        self.frames.get(at).copied()
    }
}

/// Samples available to the running program.
///
/// Assets are kept sorted by name. A program addresses them by slot, the
/// position in that order, so inserting a new name shifts the slots after it.
#[derive(Clone, Debug, Default)]
pub struct SampleBank {
    samples: Vec<SampleAsset>,
}

impl SampleBank {
    /// Store a sample, replacing any previous one with the same name
    pub fn insert(&mut self, asset: SampleAsset) -> Option<SampleAsset> {
        match self.position(&asset.name) {
            Ok(i) => Some(core::mem::replace(&mut self.samples[i], asset)),
            Err(i) => {
                self.samples.insert(i, asset);
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&SampleAsset> {
        self.position(name).ok().map(|i| &self.samples[i])
    }

    #[inline]
    pub fn by_slot(&self, slot: usize) -> Option<&SampleAsset> {
        self.samples.get(slot)
    }

    /// Slot of a sample, for use with the `sample` builtin
    pub fn slot_of(&self, name: &str) -> Option<usize> {
        self.position(name).ok()
    }

    fn position(&self, name: &str) -> Result<usize, usize> {
        self.samples.binary_search_by(|asset| asset.name.as_str().cmp(name))
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Source of sample assets, invoked from the control context.
pub trait SampleLoader {
    /// Names of the samples bundled with this loader, loaded during `init`
    fn available(&self) -> Vec<String>;

    /// Load one sample. `location` is loader specific (a path, a URL, ...).
    fn load(&mut self, name: &str, location: &str) -> Result<SampleAsset, SampleError>;
}

/// Loads Ogg Vorbis files from a directory.
pub struct VorbisLoader {
    root: PathBuf,
}

impl VorbisLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Decode a file into an interleaved sample asset
    pub fn decode(name: &str, path: &Path) -> Result<SampleAsset, SampleError> {
        let file = File::open(path)?;
        let mut reader = OggStreamReader::new(file)?;

        let channels = reader.ident_hdr.audio_channels as u16;
        let sample_rate = reader.ident_hdr.audio_sample_rate;

        let mut frames = Vec::new();
        while let Some(packet) = reader.read_dec_packet_itl()? {
            frames.extend(packet.iter().map(|&s| s as f32 / 32_768.0));
        }

        debug!(name, channels, sample_rate, samples = frames.len(), "decoded vorbis sample");
        Ok(SampleAsset::new(name, sample_rate, channels, frames))
    }
}

impl SampleLoader for VorbisLoader {
    fn available(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().map_or(false, |ext| ext == "ogg"))
            .filter_map(|path| path.file_name().and_then(|n| n.to_str()).map(String::from))
            .collect();
        names.sort();
        names
    }

    fn load(&mut self, name: &str, location: &str) -> Result<SampleAsset, SampleError> {
        let path = if location.is_empty() {
            self.root.join(name)
        } else {
            self.root.join(location)
        };
        if !path.is_file() {
            return Err(SampleError::NotFound(name.into()));
        }
        Self::decode(name, &path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_not_found() {
        let mut loader = VorbisLoader::new("/definitely/not/here");
        assert!(loader.available().is_empty());
        assert!(matches!(loader.load("kick.ogg", ""), Err(SampleError::NotFound(_))));
    }

    #[test]
    fn bank_replaces_by_name() {
        let mut bank = SampleBank::default();
        assert!(bank.insert(SampleAsset::new("a", 44_100, 2, vec![0.0; 8])).is_none());
        let old = bank.insert(SampleAsset::new("a", 44_100, 1, vec![0.5; 3])).unwrap();
        assert_eq!(old.len(), 4);
        assert_eq!(bank.get("a").map(SampleAsset::len), Some(3));
        assert_eq!(bank.len(), 1);
    }

    #[test]
    fn slots_follow_name_order() {
        let mut bank = SampleBank::default();
        bank.insert(SampleAsset::new("snare", 44_100, 1, vec![0.1]));
        bank.insert(SampleAsset::new("hat", 44_100, 1, vec![0.2]));
        bank.insert(SampleAsset::new("kick", 44_100, 1, vec![0.3]));

        let names: Vec<&str> = (0..bank.len())
            .filter_map(|i| bank.by_slot(i))
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(names, ["hat", "kick", "snare"]);
        assert_eq!(bank.slot_of("snare"), Some(2));
        assert_eq!(bank.slot_of("tom"), None);
        assert!(bank.by_slot(3).is_none());
    }

    #[test]
    fn frames_read_one_channel() {
        let asset = SampleAsset::new("st", 44_100, 2, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(asset.frame(1, 0), Some(0.3));
        assert_eq!(asset.frame(1, 1), Some(0.4));
        assert_eq!(asset.frame(1, 2), None);
        assert_eq!(asset.frame(2, 0), None);
        assert_eq!(asset.frame(usize::MAX, 1), None);
    }
}
