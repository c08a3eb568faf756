//! Reference RIFF/WAVE decoder backed by hound

use hound::{SampleFormat, WavReader};

use crate::buffer::BufferList;
use crate::format::{AudioFormat, ChannelLayout};
use crate::source::{InputSource, SourceReader};
use crate::{Error, Result};

use super::Decoder;

/// Decodes RIFF/WAVE audio from any [`InputSource`], converting integer and
/// float sample widths to the engine's canonical non-interleaved f32 format.
pub struct WavDecoder {
    source: Option<Box<dyn InputSource>>,
    reader: Option<WavReader<SourceReader>>,
    source_format: AudioFormat,
    output_format: AudioFormat,
    total_frames: i64,
    current_frame: i64,
}

impl WavDecoder {
    /// Create a decoder for `source`. The stream is parsed by
    /// [`Decoder::open`].
    pub fn new(source: Box<dyn InputSource>) -> Self {
        WavDecoder {
            source: Some(source),
            reader: None,
            source_format: AudioFormat::pcm_f32(0.0, 0),
            output_format: AudioFormat::pcm_f32(0.0, 0),
            total_frames: 0,
            current_frame: 0,
        }
    }

    fn reader_mut(&mut self) -> Result<&mut WavReader<SourceReader>> {
        self.reader
            .as_mut()
            .ok_or_else(|| Error::DecoderInit("decoder is not open".into()))
    }

    /// Normalization divisor for an integer sample width.
    fn int_scale(bits: u16) -> f32 {
        (1i64 << (bits - 1)) as f32
    }
}

impl Decoder for WavDecoder {
    fn open(&mut self) -> Result<()> {
        if self.reader.is_some() {
            return Ok(());
        }
        let source = self
            .source
            .take()
            .ok_or_else(|| Error::DecoderInit("decoder already consumed its source".into()))?;
        let reader = WavReader::new(SourceReader::new(source)?)
            .map_err(|e| Error::UnsupportedFormat(format!("not a WAVE stream: {e}")))?;

        let spec = reader.spec();
        if spec.channels == 0 || spec.channels > 32 {
            return Err(Error::UnsupportedFormat(format!(
                "unsupported channel count {}",
                spec.channels
            )));
        }

        self.source_format = match spec.sample_format {
            SampleFormat::Float => {
                let mut fmt =
                    AudioFormat::pcm_f32(spec.sample_rate as f64, spec.channels as u32);
                fmt.interleaved = true;
                fmt.bytes_per_frame = 4 * spec.channels as u32;
                fmt
            }
            SampleFormat::Int => {
                let mut fmt = AudioFormat::pcm_int(
                    spec.sample_rate as f64,
                    spec.channels as u32,
                    spec.bits_per_sample as u32,
                    false,
                );
                fmt.interleaved = true;
                fmt.bytes_per_frame = ((spec.bits_per_sample as u32 + 7) / 8) * spec.channels as u32;
                fmt
            }
        };
        self.output_format = AudioFormat::pcm_f32(spec.sample_rate as f64, spec.channels as u32);
        self.total_frames = (reader.duration() as i64).max(0);
        self.current_frame = 0;
        self.reader = Some(reader);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(reader) = self.reader.take() {
            self.source = Some(reader.into_inner().into_inner());
        }
        self.current_frame = 0;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    fn source_format(&self) -> AudioFormat {
        self.source_format
    }

    fn output_format(&self) -> AudioFormat {
        self.output_format
    }

    fn channel_layout(&self) -> Option<ChannelLayout> {
        Some(ChannelLayout::default_for_channels(self.output_format.channels))
    }

    fn total_frames(&self) -> i64 {
        self.total_frames
    }

    fn current_frame(&self) -> i64 {
        self.current_frame
    }

    fn supports_seeking(&self) -> bool {
        true
    }

    fn seek_to_frame(&mut self, frame: i64) -> i64 {
        if frame < 0 || frame > self.total_frames {
            return -1;
        }
        let Ok(reader) = self.reader_mut() else {
            return -1;
        };
        match reader.seek(frame as u32) {
            Ok(()) => {
                self.current_frame = frame;
                frame
            }
            Err(_) => -1,
        }
    }

    fn read_audio(&mut self, buffer: &mut BufferList, frame_count: u32) -> Result<u32> {
        let channels = self.output_format.channels as usize;
        let bits = self.source_format.bits_per_channel as u16;
        let float_input = self.source_format.is_float;
        let capacity = buffer.capacity_frames() as u32;
        let requested = frame_count.min(capacity);

        buffer.empty();

        let reader = self.reader_mut()?;
        let mut deinterleaved: Vec<Vec<f32>> =
            (0..channels).map(|_| Vec::with_capacity(requested as usize)).collect();
        let mut frames_read = 0u32;

        let io_error =
            |e: hound::Error| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()));

        if float_input {
            let mut samples = reader.samples::<f32>();
            'frames: while frames_read < requested {
                let mut frame = [0f32; 32];
                for slot in frame.iter_mut().take(channels) {
                    match samples.next() {
                        Some(Ok(sample)) => *slot = sample,
                        Some(Err(e)) => return Err(io_error(e)),
                        // A frame truncated by end of stream is dropped.
                        None => break 'frames,
                    }
                }
                for (channel, &sample) in frame.iter().take(channels).enumerate() {
                    deinterleaved[channel].push(sample);
                }
                frames_read += 1;
            }
        } else {
            let scale = Self::int_scale(bits);
            let mut samples = reader.samples::<i32>();
            'frames_int: while frames_read < requested {
                let mut frame = [0f32; 32];
                for slot in frame.iter_mut().take(channels) {
                    match samples.next() {
                        Some(Ok(sample)) => *slot = sample as f32 / scale,
                        Some(Err(e)) => return Err(io_error(e)),
                        None => break 'frames_int,
                    }
                }
                for (channel, &sample) in frame.iter().take(channels).enumerate() {
                    deinterleaved[channel].push(sample);
                }
                frames_read += 1;
            }
        }

        for (channel, samples) in deinterleaved.iter().enumerate() {
            buffer.write_f32(channel, 0, samples);
        }
        buffer.set_frame_len(frames_read as usize);
        self.current_frame += frames_read as i64;
        Ok(frames_read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryInputSource;

    fn wav_bytes(sample_rate: u32, channels: u16, frames: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for frame in 0..frames {
                for channel in 0..channels {
                    let sample = ((frame as i32 % 100) - 50) * (channel as i32 + 1);
                    writer.write_sample(sample as i16).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn open_decoder(sample_rate: u32, channels: u16, frames: u32) -> WavDecoder {
        let source = Box::new(MemoryInputSource::new(wav_bytes(sample_rate, channels, frames)));
        let mut decoder = WavDecoder::new(source);
        decoder.open().unwrap();
        decoder
    }

    #[test]
    fn test_open_reads_stream_parameters() {
        let decoder = open_decoder(44100, 2, 1000);
        assert!(decoder.is_open());
        assert_eq!(decoder.total_frames(), 1000);
        assert_eq!(decoder.output_format().channels, 2);
        assert_eq!(decoder.output_format().sample_rate, 44100.0);
        assert!(decoder.output_format().is_float);
        assert!(!decoder.output_format().interleaved);
        assert!(decoder.source_format().interleaved);
    }

    #[test]
    fn test_read_audio_deinterleaves() {
        let mut decoder = open_decoder(44100, 2, 100);
        let mut buffer = BufferList::new(decoder.output_format(), 64).unwrap();

        let read = decoder.read_audio(&mut buffer, 64).unwrap();
        assert_eq!(read, 64);
        assert_eq!(buffer.frame_len(), 64);
        assert_eq!(decoder.current_frame(), 64);

        // Channel 1 carries twice channel 0's amplitude by construction.
        let left = buffer.channel_f32(0);
        let right = buffer.channel_f32(1);
        for frame in 0..64 {
            assert!((right[frame] - 2.0 * left[frame]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_end_of_stream_returns_zero() {
        let mut decoder = open_decoder(44100, 1, 10);
        let mut buffer = BufferList::new(decoder.output_format(), 32).unwrap();

        assert_eq!(decoder.read_audio(&mut buffer, 32).unwrap(), 10);
        assert_eq!(decoder.read_audio(&mut buffer, 32).unwrap(), 0);
    }

    #[test]
    fn test_seek_round_trip() {
        let mut decoder = open_decoder(44100, 1, 500);
        let mut tail = BufferList::new(decoder.output_format(), 16).unwrap();

        // Read the stream from frame 100 directly.
        assert_eq!(decoder.seek_to_frame(100), 100);
        decoder.read_audio(&mut tail, 16).unwrap();
        let expected: Vec<f32> = tail.channel_f32(0).to_vec();

        // Read frames 0..116 from a fresh decoder; the last 16 must match.
        let mut fresh = open_decoder(44100, 1, 500);
        let mut skip = BufferList::new(fresh.output_format(), 100).unwrap();
        fresh.read_audio(&mut skip, 100).unwrap();
        let mut check = BufferList::new(fresh.output_format(), 16).unwrap();
        fresh.read_audio(&mut check, 16).unwrap();
        assert_eq!(check.channel_f32(0), expected.as_slice());
    }

    #[test]
    fn test_rejects_non_wav() {
        let source = Box::new(MemoryInputSource::new(vec![0u8; 64]));
        let mut decoder = WavDecoder::new(source);
        assert!(matches!(
            decoder.open(),
            Err(Error::UnsupportedFormat(_))
        ));
    }
}
