use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::OUTPUT_SAMPLE_RATE;

/// Incremental writer for the intermediate mono 16-bit PCM waveform.
///
/// Chunks are appended as they arrive from the engine so a long part never
/// has to be held in memory in full.
pub struct WaveformWriter {
    writer: hound::WavWriter<BufWriter<File>>,
    samples_written: u64,
}

impl WaveformWriter {
    /// Create (or truncate) the waveform at `path`.
    pub fn create(path: &Path) -> Result<Self, hound::Error> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: OUTPUT_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        Ok(Self {
            writer: hound::WavWriter::create(path, spec)?,
            samples_written: 0,
        })
    }

    /// Append f32 samples in `[-1.0, 1.0]`, converting them to i16.
    pub fn write_samples(&mut self, samples: &[f32]) -> Result<(), hound::Error> {
        for &sample in samples {
            self.writer.write_sample(to_pcm16(sample))?;
        }
        self.samples_written += samples.len() as u64;
        Ok(())
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Duration of the audio written so far in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples_written as f64 / OUTPUT_SAMPLE_RATE as f64
    }

    /// Flush and patch the header lengths.
    pub fn finalize(self) -> Result<(), hound::Error> {
        self.writer.finalize()
    }
}

fn to_pcm16(sample: f32) -> i16 {
    (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::{to_pcm16, WaveformWriter};
    use crate::OUTPUT_SAMPLE_RATE;

    #[test]
    fn scales_and_clamps_samples() {
        assert_eq!(to_pcm16(0.0), 0);
        assert_eq!(to_pcm16(1.0), i16::MAX);
        assert_eq!(to_pcm16(-1.0), -i16::MAX);
        assert_eq!(to_pcm16(3.0), i16::MAX);
        assert_eq!(to_pcm16(-3.0), i16::MIN);
    }

    #[test]
    fn writes_mono_16bit_wave_incrementally() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("part.wav");

        let mut writer = WaveformWriter::create(&path).expect("create wav");
        writer.write_samples(&[0.0, 0.5]).expect("first chunk");
        writer.write_samples(&[-0.5]).expect("second chunk");
        assert_eq!(writer.samples_written(), 3);
        writer.finalize().expect("finalize");

        let reader = hound::WavReader::open(&path).expect("open wav");
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_rate, OUTPUT_SAMPLE_RATE);
        assert_eq!(reader.len(), 3);
    }
}
