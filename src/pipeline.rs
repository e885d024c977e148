//! Extraction driver.
//!
//! Sequential flow:
//! genre dirs (sorted) -> files (sorted) -> decode -> segments -> extract -> validate -> dataset
//!
//! With `workers > 1`:
//! Main Thread -> Job Channel -> Worker Threads -> Result Channel -> Main Thread
//!
//! - Label ids are assigned up front, in traversal order
//! - Workers decode and extract whole files independently
//! - Results are re-ordered by job index before they reach the dataset, so
//!   the output matches a sequential run byte for byte

use crossbeam::channel::{bounded, unbounded};
use std::path::{Path, PathBuf};
use std::thread;
use thiserror::Error;
use tracing::{debug, info, trace, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::ExtractionConfig;
use crate::dataset::Dataset;
use crate::decode::{decode_file, DecodeError, Track};
use crate::error::{ConfigError, ExtractError};
use crate::segment::SegmentPlan;
use crate::transform::{build_extractor, FeatureExtractor, FeatureMatrix};
use crate::validate;

/// A genre directory and the files inside it, both in sorted order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Genre {
    pub name: String,
    pub files: Vec<PathBuf>,
}

/// Driver progress. `Done` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    EnumeratingGenres,
    ProcessingFile,
    ProcessingSegment,
    Done,
}

impl State {
    /// Whether the driver may move from `self` to `next`.
    pub fn can_advance_to(self, next: State) -> bool {
        use State::*;
        matches!(
            (self, next),
            (Idle, EnumeratingGenres)
                | (EnumeratingGenres, ProcessingFile | Done)
                | (ProcessingFile | ProcessingSegment, ProcessingFile | ProcessingSegment | Done)
        )
    }
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub genres: usize,
    pub files_decoded: usize,
    pub files_skipped: usize,
    pub segments_accepted: usize,
    pub segments_rejected: usize,
    pub segments_failed: usize,
}

/// Why a file contributed nothing. Recovered by skipping the file.
#[derive(Error, Debug)]
enum FileError {
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("sample rate is {actual} Hz, run expects {expected} Hz")]
    SampleRate { expected: u32, actual: u32 },
}

/// Features of one file that passed validation, plus drop counts.
#[derive(Debug, Default)]
struct FileFeatures {
    accepted: Vec<FeatureMatrix>,
    rejected: usize,
    failed: usize,
}

struct Job {
    label: usize,
    path: PathBuf,
}

/// List genre directories directly under `root` with their files.
///
/// Both levels are sorted by name so label ids do not depend on filesystem
/// enumeration order. Hidden entries are ignored.
pub fn discover_genres(root: &Path) -> Result<Vec<Genre>, ConfigError> {
    if !root.exists() {
        return Err(ConfigError::MissingDatasetRoot(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(ConfigError::NotADirectory(root.to_path_buf()));
    }

    let genres = list_entries(root)
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| Genre {
            name: entry.file_name().to_string_lossy().into_owned(),
            files: list_entries(entry.path())
                .filter(|e| e.file_type().is_file())
                .map(DirEntry::into_path)
                .collect(),
        })
        .collect();

    Ok(genres)
}

fn list_entries(dir: &Path) -> impl Iterator<Item = DirEntry> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Error accessing entry: {}", e);
                None
            }
        })
        .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
}

/// Runs one extraction. Consumed by [`Driver::run`] / [`Driver::extract`].
pub struct Driver {
    config: ExtractionConfig,
    extractor: Box<dyn FeatureExtractor>,
    plan: SegmentPlan,
    state: State,
    #[cfg(test)]
    visited: Vec<State>,
}

impl Driver {
    /// Build the extractor named by `config.transform`.
    pub fn new(config: ExtractionConfig) -> Result<Self, ExtractError> {
        config.validate()?;
        let extractor = build_extractor(config.sample_rate, &config.transform)?;
        Self::with_extractor(config, extractor)
    }

    /// Use a caller-supplied extractor instead of `config.transform`.
    pub fn with_extractor(
        config: ExtractionConfig,
        extractor: Box<dyn FeatureExtractor>,
    ) -> Result<Self, ExtractError> {
        config.validate()?;
        let rule = extractor.frame_rule();
        let plan = SegmentPlan::new(
            config.sample_rate,
            config.track_duration_seconds,
            config.segment_count,
            rule,
        )?;

        if plan.hop_aligned(rule) {
            warn!(
                samples_per_segment = plan.samples_per_segment,
                ?rule,
                expected_frames = plan.expected_frame_count,
                "Segment length is a multiple of the hop; the transform yields one extra frame and every segment will be rejected"
            );
        }

        debug!(
            samples_per_segment = plan.samples_per_segment,
            expected_frames = plan.expected_frame_count,
            segments = plan.segment_count,
            "Segment plan"
        );

        Ok(Self {
            config,
            extractor,
            plan,
            state: State::Idle,
            #[cfg(test)]
            visited: vec![State::Idle],
        })
    }

    pub fn plan(&self) -> &SegmentPlan {
        &self.plan
    }

    /// Extract the whole dataset and write it to `config.output_path`.
    pub fn run(self) -> Result<RunSummary, ExtractError> {
        let output_path = self.config.output_path.clone();
        let (dataset, summary) = self.extract()?;

        dataset.write_json(&output_path)?;
        info!(
            path = %output_path.display(),
            entries = dataset.len(),
            genres = summary.genres,
            "Dataset written"
        );

        Ok(summary)
    }

    /// Extract the whole dataset in memory without writing it.
    pub fn extract(mut self) -> Result<(Dataset, RunSummary), ExtractError> {
        self.extract_all()
    }

    fn extract_all(&mut self) -> Result<(Dataset, RunSummary), ExtractError> {
        self.transition(State::EnumeratingGenres);
        let genres = discover_genres(&self.config.dataset_path)?;

        let mut dataset = Dataset::new(self.extractor.feature_key());
        let mut summary = RunSummary::default();

        if self.config.workers > 1 {
            let mut jobs = Vec::new();
            for genre in &genres {
                let label = dataset.register_label(&genre.name);
                info!(genre = %genre.name, label, files = genre.files.len(), "Queued genre");
                jobs.extend(genre.files.iter().map(|path| Job {
                    label,
                    path: path.clone(),
                }));
            }

            self.transition(State::ProcessingFile);
            let outcomes = self.extract_parallel(&jobs);
            for (job, outcome) in jobs.iter().zip(outcomes) {
                // Worker segments are validated; this replays them into the dataset
                if outcome.is_ok() {
                    self.transition(State::ProcessingSegment);
                }
                merge_file(&mut dataset, &mut summary, job, outcome)?;
            }
        } else {
            for genre in &genres {
                let label = dataset.register_label(&genre.name);
                info!(genre = %genre.name, label, files = genre.files.len(), "Processing genre");

                for path in &genre.files {
                    let job = Job {
                        label,
                        path: path.clone(),
                    };
                    self.transition(State::ProcessingFile);
                    let outcome = self.load_track(path).map(|track| {
                        self.transition(State::ProcessingSegment);
                        self.extract_segments(&track, path)
                    });
                    merge_file(&mut dataset, &mut summary, &job, outcome)?;
                }
            }
        }

        summary.genres = dataset.mapping().len();
        self.transition(State::Done);

        info!(
            genres = summary.genres,
            files = summary.files_decoded,
            skipped = summary.files_skipped,
            accepted = summary.segments_accepted,
            rejected = summary.segments_rejected,
            "Extraction finished"
        );

        Ok((dataset, summary))
    }

    fn transition(&mut self, next: State) {
        trace!(from = ?self.state, to = ?next, "Driver state");
        debug_assert!(
            self.state.can_advance_to(next),
            "invalid driver transition {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
        #[cfg(test)]
        self.visited.push(next);
    }

    fn load_track(&self, path: &Path) -> Result<Track, FileError> {
        let track = decode_file(path)?.into_track(self.config.channel_mode);
        if track.sample_rate != self.config.sample_rate {
            return Err(FileError::SampleRate {
                expected: self.config.sample_rate,
                actual: track.sample_rate,
            });
        }
        Ok(track)
    }

    fn extract_segments(&self, track: &Track, path: &Path) -> FileFeatures {
        let mut features = FileFeatures::default();

        for index in 0..self.plan.segment_count {
            let segment = self.plan.slice(&track.samples, index);

            let matrix = match self.extractor.extract(segment, track.sample_rate) {
                Ok(matrix) => matrix,
                Err(e) => {
                    warn!(path = %path.display(), segment = index, error = %e, "Transform failed, dropping segment");
                    features.failed += 1;
                    continue;
                }
            };

            match validate::check(&matrix, self.plan.expected_frame_count) {
                Ok(()) => {
                    debug!(path = %path.display(), segment = index, "Segment accepted");
                    features.accepted.push(matrix);
                }
                Err(mismatch) => {
                    debug!(path = %path.display(), segment = index, %mismatch, "Segment dropped");
                    features.rejected += 1;
                }
            }
        }

        features
    }

    /// Extract every job on `config.workers` threads; results come back in job order.
    fn extract_parallel(&self, jobs: &[Job]) -> Vec<Result<FileFeatures, FileError>> {
        let (job_tx, job_rx) = bounded::<usize>(self.config.workers * 2);
        let (result_tx, result_rx) = unbounded();

        let mut results = thread::scope(|scope| {
            for _ in 0..self.config.workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();

                scope.spawn(move || {
                    for index in job_rx {
                        let path = &jobs[index].path;
                        let outcome = self
                            .load_track(path)
                            .map(|track| self.extract_segments(&track, path));
                        if result_tx.send((index, outcome)).is_err() {
                            return;
                        }
                    }
                });
            }
            drop(job_rx);
            drop(result_tx);

            for index in 0..jobs.len() {
                if job_tx.send(index).is_err() {
                    break;
                }
            }
            drop(job_tx);

            result_rx.iter().collect::<Vec<_>>()
        });

        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, outcome)| outcome).collect()
    }
}

fn merge_file(
    dataset: &mut Dataset,
    summary: &mut RunSummary,
    job: &Job,
    outcome: Result<FileFeatures, FileError>,
) -> Result<(), ExtractError> {
    let features = match outcome {
        Ok(features) => features,
        Err(e) => {
            warn!(path = %job.path.display(), error = %e, "Skipping file");
            summary.files_skipped += 1;
            return Ok(());
        }
    };

    summary.files_decoded += 1;
    summary.segments_rejected += features.rejected;
    summary.segments_failed += features.failed;
    for matrix in features.accepted {
        dataset.add(matrix, job.label)?;
        summary.segments_accepted += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_discover_genres_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for genre in ["rock", "blues", "jazz", ".cache"] {
            fs::create_dir(dir.path().join(genre)).unwrap();
        }
        fs::write(dir.path().join("README.txt"), "not a genre").unwrap();
        for name in ["b.wav", "a.wav", ".DS_Store"] {
            fs::write(dir.path().join("jazz").join(name), "").unwrap();
        }

        let genres = discover_genres(dir.path()).unwrap();
        let names: Vec<&str> = genres.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, ["blues", "jazz", "rock"]);

        let jazz: Vec<_> = genres[1]
            .files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(jazz, ["a.wav", "b.wav"]);
        assert!(genres[0].files.is_empty());
    }

    #[test]
    fn test_discover_genres_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        assert_eq!(
            discover_genres(&missing),
            Err(ConfigError::MissingDatasetRoot(missing))
        );
    }

    #[test]
    fn test_merge_counts_skips() {
        let mut dataset = Dataset::new(crate::transform::FeatureKey::Mfcc);
        let label = dataset.register_label("blues");
        let mut summary = RunSummary::default();
        let job = Job {
            label,
            path: PathBuf::from("blues/broken.wav"),
        };

        merge_file(
            &mut dataset,
            &mut summary,
            &job,
            Err(FileError::SampleRate {
                expected: 22050,
                actual: 44100,
            }),
        )
        .unwrap();
        merge_file(
            &mut dataset,
            &mut summary,
            &job,
            Ok(FileFeatures {
                accepted: vec![FeatureMatrix::default(); 2],
                rejected: 1,
                failed: 0,
            }),
        )
        .unwrap();

        assert_eq!(summary.files_skipped, 1);
        assert_eq!(summary.files_decoded, 1);
        assert_eq!(summary.segments_accepted, 2);
        assert_eq!(summary.segments_rejected, 1);
        assert_eq!(dataset.labels(), [0, 0]);
    }

    #[test]
    fn test_state_edges() {
        assert!(State::Idle.can_advance_to(State::EnumeratingGenres));
        assert!(State::EnumeratingGenres.can_advance_to(State::Done));
        assert!(State::ProcessingSegment.can_advance_to(State::ProcessingFile));
        assert!(!State::Idle.can_advance_to(State::ProcessingSegment));
        assert!(!State::Done.can_advance_to(State::ProcessingFile));
        assert!(!State::ProcessingFile.can_advance_to(State::EnumeratingGenres));
    }

    fn write_tone(path: &Path, seconds: f32) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..(22050.0 * seconds) as usize {
            let s = (i as f32 * 0.05).sin() * 8000.0;
            writer.write_sample(s as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_parallel_run_visits_every_state() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("genres");
        write_tone(&root.join("blues").join("a.wav"), 1.0);
        write_tone(&root.join("jazz").join("a.wav"), 1.0);
        fs::write(root.join("jazz").join("broken.wav"), "noise").unwrap();

        let config = ExtractionConfig {
            track_duration_seconds: 1.0,
            segment_count: 2,
            workers: 2,
            ..ExtractionConfig::new(
                &root,
                dir.path().join("out.json"),
                crate::config::TransformConfig::Mfcc(Default::default()),
            )
        };
        let mut driver = Driver::new(config).unwrap();
        let (dataset, summary) = driver.extract_all().unwrap();

        assert_eq!(dataset.len(), 4);
        assert_eq!(summary.files_skipped, 1);
        assert_eq!(
            driver.visited,
            [
                State::Idle,
                State::EnumeratingGenres,
                State::ProcessingFile,
                State::ProcessingSegment,
                State::ProcessingSegment,
                State::Done,
            ]
        );
    }
}
