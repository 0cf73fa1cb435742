//! Visual stimuli: the library of available names and the playback sink.
//!
//! Rendering is outside this crate. A [`StimulusSink`] receives playback
//! requests; the bundled [`TimedStimulusSink`] only logs them and holds for
//! the retention time so timing behaves as with a real display.

use crate::error::StimResult;
use crate::interrupt::Interrupt;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Names of the stimuli that can be played.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StimulusLibrary {
    names: Vec<String>,
}

impl StimulusLibrary {
    /// Library over explicit names.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = names.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();
        Self { names }
    }

    /// File stems of `*.<extension>` in `dir`. A missing directory yields an
    /// empty library.
    pub fn scan(dir: &Path, extension: &str) -> StimResult<Self> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(dir = %dir.display(), "Stimulus directory not found");
                return Ok(Self::default());
            }
            Err(err) => return Err(err.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let matches = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));
            if !matches {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                names.push(stem.to_string());
            }
        }
        let library = Self::from_names(names);
        info!(count = library.len(), dir = %dir.display(), "Stimuli loaded");
        Ok(library)
    }

    /// Sorted names.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Whether `name` is available.
    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|known| known == name)
    }

    /// Number of stimuli.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True when nothing was found.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// What to play.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackRequest {
    /// Stimulus name
    pub stimulus: String,
    /// How long the last frame is held
    pub retention: Duration,
}

/// What was played.
#[derive(Debug, Clone)]
pub struct PlaybackReport {
    /// Wall-clock start
    pub started: DateTime<Local>,
    /// Time from start to the end of retention
    pub elapsed: Duration,
}

/// Destination for stimulus playback.
#[async_trait]
pub trait StimulusSink: Send {
    /// Play one stimulus to completion; `interrupt` aborts the playback.
    async fn play(
        &mut self,
        request: &PlaybackRequest,
        interrupt: &Interrupt,
    ) -> StimResult<PlaybackReport>;
}

/// Sink without a display: logs the request and waits `clip + retention`.
#[derive(Debug, Clone, Default)]
pub struct TimedStimulusSink {
    clip: Duration,
    played: Vec<String>,
}

impl TimedStimulusSink {
    /// Sink that pretends every clip lasts `clip`.
    pub fn new(clip: Duration) -> Self {
        Self {
            clip,
            played: Vec::new(),
        }
    }

    /// Names played so far, in order.
    pub fn played(&self) -> &[String] {
        &self.played
    }
}

#[async_trait]
impl StimulusSink for TimedStimulusSink {
    async fn play(
        &mut self,
        request: &PlaybackRequest,
        interrupt: &Interrupt,
    ) -> StimResult<PlaybackReport> {
        let started = Local::now();
        let start = Instant::now();
        info!(stimulus = %request.stimulus, "Playing stimulus");
        interrupt.sleep(self.clip + request.retention).await?;
        self.played.push(request.stimulus.clone());
        Ok(PlaybackReport {
            started,
            elapsed: start.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_uses_file_stems_with_matching_extension() {
        let dir = tempfile::tempdir().unwrap();
        for file in ["looming.avi", "grating.AVI", "notes.txt", "dark.mp4"] {
            fs::write(dir.path().join(file), b"").unwrap();
        }
        let library = StimulusLibrary::scan(dir.path(), "avi").unwrap();
        assert_eq!(library.names(), &["grating".to_string(), "looming".to_string()]);
        assert!(library.contains("looming"));
        assert!(!library.contains("dark"));
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let library = StimulusLibrary::scan(&dir.path().join("nope"), "avi").unwrap();
        assert!(library.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timed_sink_waits_clip_and_retention() {
        let mut sink = TimedStimulusSink::new(Duration::from_millis(500));
        let request = PlaybackRequest {
            stimulus: "looming".to_string(),
            retention: Duration::from_millis(250),
        };
        let report = sink.play(&request, &Interrupt::new()).await.unwrap();
        assert!(report.elapsed >= Duration::from_millis(750));
        assert_eq!(sink.played(), &["looming".to_string()]);
    }
}
