//! Session recorder - saves what was sent and what was heard as WAV files

use crate::pcm;
use chrono::Local;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::error;

type Wav = WavWriter<BufWriter<File>>;

/// Writes `input.wav` and `output.wav` into one directory per session.
pub struct SessionRecorder {
    dir: PathBuf,
    input: Option<Wav>,
    output: Option<Wav>,
}

fn wav_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

impl SessionRecorder {
    /// Create `<base>/<timestamp>_<persona>/` and open both files.
    pub fn create(base: &Path, persona: &str) -> std::io::Result<Self> {
        let ts = Local::now().format("%Y%m%d_%H%M%S");
        let label: String = persona
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        let dir = base.join(format!("{ts}_{label}"));
        Self::create_in(dir)
    }

    pub fn create_in(dir: PathBuf) -> std::io::Result<Self> {
        fs::create_dir_all(&dir)?;
        let input = WavWriter::create(dir.join("input.wav"), wav_spec(pcm::INPUT_SAMPLE_RATE))
            .map_err(std::io::Error::other)?;
        let output = WavWriter::create(dir.join("output.wav"), wav_spec(pcm::OUTPUT_SAMPLE_RATE))
            .map_err(std::io::Error::other)?;
        Ok(Self {
            dir,
            input: Some(input),
            output: Some(output),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Audio that was sent to the model.
    pub fn on_input(&mut self, samples: &[i16]) {
        write_samples(&mut self.input, samples, "input");
    }

    /// Audio that came back from the model.
    pub fn on_output(&mut self, samples: &[i16]) {
        write_samples(&mut self.output, samples, "output");
    }

    /// Flush headers. Further writes are ignored.
    pub fn finish(&mut self) {
        for (writer, label) in [(self.input.take(), "input"), (self.output.take(), "output")] {
            if let Some(writer) = writer {
                if let Err(e) = writer.finalize() {
                    error!("Failed to finalize {} recording: {}", label, e);
                }
            }
        }
    }
}

fn write_samples(writer: &mut Option<Wav>, samples: &[i16], label: &str) {
    let Some(w) = writer.as_mut() else {
        return;
    };
    for &s in samples {
        if let Err(e) = w.write_sample(s) {
            error!("Failed to write {} audio, recording stopped: {}", label, e);
            *writer = None;
            return;
        }
    }
}

impl Drop for SessionRecorder {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("bankedge-recorder-{}-{}", name, std::process::id()))
    }

    #[test]
    fn writes_both_directions() {
        let dir = scratch_dir("both");
        let _ = fs::remove_dir_all(&dir);

        let mut recorder = SessionRecorder::create_in(dir.clone()).unwrap();
        recorder.on_input(&[1, 2, 3]);
        recorder.on_output(&[-4, 5]);
        recorder.on_output(&[6]);
        recorder.finish();
        recorder.on_input(&[7]);

        let input = hound::WavReader::open(dir.join("input.wav")).unwrap();
        assert_eq!(input.spec().sample_rate, 16_000);
        let samples: Vec<i16> = input.into_samples().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, 2, 3]);

        let output = hound::WavReader::open(dir.join("output.wav")).unwrap();
        assert_eq!(output.spec().sample_rate, 24_000);
        let samples: Vec<i16> = output.into_samples().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![-4, 5, 6]);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn session_dirs_are_timestamped_and_safe() {
        let base = scratch_dir("named");
        let _ = fs::remove_dir_all(&base);

        let recorder = SessionRecorder::create(&base, "HR panel/2").unwrap();
        let name = recorder.dir().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with("_HR_panel_2"), "{name}");
        assert_eq!(recorder.dir().parent(), Some(base.as_path()));
        drop(recorder);

        let _ = fs::remove_dir_all(&base);
    }
}
