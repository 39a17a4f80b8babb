//! WAV file input and output for recorded sessions and tests

use crate::audio_buffer::AudioSample;
use crate::source::{AudioError, CaptureFormat, ReplaySource};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::Path;
use tracing::debug;

/// Write mono 16-bit PCM
pub fn write_wav(
    path: impl AsRef<Path>,
    samples: &[AudioSample],
    sample_rate: u32,
) -> Result<(), AudioError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path.as_ref(), spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    Ok(())
}

/// Load a WAV file as a replayable source of `frame_ms` frames
///
/// Multi-channel files keep their first channel. Float and 8/24/32-bit
/// integer files are converted to 16-bit.
pub fn read_wav(path: impl AsRef<Path>, frame_ms: u32) -> Result<ReplaySource, AudioError> {
    let mut reader = WavReader::open(path.as_ref())?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<AudioSample> = match spec.sample_format {
        SampleFormat::Int if spec.bits_per_sample <= 16 => {
            let shift = 16 - spec.bits_per_sample as u32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| (v << shift) as AudioSample))
                .collect::<Result<_, _>>()?
        }
        SampleFormat::Int => {
            let shift = spec.bits_per_sample as u32 - 16;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| (v >> shift) as AudioSample))
                .collect::<Result<_, _>>()?
        }
        SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as AudioSample))
            .collect::<Result<_, _>>()?,
    };

    let mono: Vec<AudioSample> = interleaved.iter().step_by(channels).copied().collect();

    debug!(
        path = %path.as_ref().display(),
        sample_rate = spec.sample_rate,
        channels,
        samples = mono.len(),
        "Loaded WAV file"
    );

    let format = CaptureFormat::from_millis(spec.sample_rate, frame_ms);
    Ok(ReplaySource::from_samples(format, &mono))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FrameSource;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_wav_roundtrip_into_frames() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        let samples: Vec<i16> = (0..1000).map(|i| (i % 200) as i16).collect();

        write_wav(&path, &samples, 16000).unwrap();
        let mut source = read_wav(&path, 30).unwrap();

        assert_eq!(source.format().sample_rate, 16000);
        // 1000 samples -> 2 whole 480-sample frames
        assert_eq!(source.remaining(), 2);
        let first = source.next_frame().await.unwrap();
        assert_eq!(&first.samples[..5], &samples[..5]);
    }

    #[test]
    fn test_stereo_keeps_first_channel() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for _ in 0..240 {
            writer.write_sample(100i16).unwrap();
            writer.write_sample(-100i16).unwrap();
        }
        writer.finalize().unwrap();

        let source = read_wav(&path, 30).unwrap();
        assert_eq!(source.format().frame_size, 240);
        assert_eq!(source.remaining(), 1);
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(matches!(
            read_wav("/nonexistent/clip.wav", 30),
            Err(AudioError::Wav(_))
        ));
    }
}
