//! # WAV Container Support
//!
//! Builds the canonical 44-byte RIFF/WAVE header for raw PCM16 mono audio
//! and writes optional session recordings to disk. Live streaming never
//! touches a container; this exists so captured frames can be saved and
//! replayed as standalone files.

use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Size of the canonical header: RIFF descriptor + fmt chunk + data chunk.
pub const WAV_HEADER_LEN: usize = 44;

/// Build a canonical RIFF/WAVE header for `data_len` bytes of PCM16 mono
/// audio at `sample_rate`.
///
/// ## Layout (all multi-byte fields little-endian):
/// - bytes 0..12: "RIFF", chunk size (36 + data_len), "WAVE"
/// - bytes 12..36: "fmt ", subchunk size 16, format 1 (PCM), 1 channel,
///   sample rate, byte rate (rate × 2), block align 2, 16 bits/sample
/// - bytes 36..44: "data", data_len
pub fn build_wav_header(data_len: u32, sample_rate: u32) -> [u8; WAV_HEADER_LEN] {
    let mut header = [0u8; WAV_HEADER_LEN];

    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&(36 + data_len).to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");

    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&1u16.to_le_bytes()); // PCM
    header[22..24].copy_from_slice(&1u16.to_le_bytes()); // mono
    header[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&(sample_rate * 2).to_le_bytes()); // byte rate
    header[32..34].copy_from_slice(&2u16.to_le_bytes()); // block align
    header[34..36].copy_from_slice(&16u16.to_le_bytes()); // bits per sample

    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_len.to_le_bytes());

    header
}

/// Strip a RIFF/WAVE header from an inbound chunk, returning the PCM
/// payload it wraps.
///
/// Only the exact format this pipeline speaks is accepted: PCM, mono,
/// 16-bit. Anything else is a decode failure for that chunk.
pub fn strip_wav_header(data: &[u8]) -> Option<Result<&[u8], String>> {
    if data.len() < WAV_HEADER_LEN || &data[0..4] != b"RIFF" || &data[8..12] != b"WAVE" {
        return None; // not a WAV container at all
    }

    let format = u16::from_le_bytes([data[20], data[21]]);
    let channels = u16::from_le_bytes([data[22], data[23]]);
    let bits = u16::from_le_bytes([data[34], data[35]]);

    if format != 1 || channels != 1 || bits != 16 {
        return Some(Err(format!(
            "unsupported WAV format (format={}, channels={}, bits={})",
            format, channels, bits
        )));
    }

    Some(Ok(&data[WAV_HEADER_LEN..]))
}

/// Streams captured PCM frames into a WAV file.
///
/// The header is written up front with a zero data length and patched on
/// `finalize()`, so a crash mid-session leaves a file that merely reports
/// zero-length audio rather than a corrupt one.
pub struct WavRecorder {
    file: File,
    path: PathBuf,
    sample_rate: u32,
    data_len: u32,
}

impl WavRecorder {
    /// Create the recording file and write the placeholder header.
    pub fn create(path: &Path, sample_rate: u32) -> io::Result<Self> {
        let mut file = File::create(path)?;
        file.write_all(&build_wav_header(0, sample_rate))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            sample_rate,
            data_len: 0,
        })
    }

    /// Append one encoded PCM frame.
    pub fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.file.write_all(frame)?;
        self.data_len += frame.len() as u32;
        Ok(())
    }

    /// Patch the header with the final data length and flush.
    pub fn finalize(mut self) -> io::Result<PathBuf> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file
            .write_all(&build_wav_header(self.data_len, self.sample_rate))?;
        self.file.flush()?;
        Ok(self.path)
    }

    /// Bytes of audio written so far.
    pub fn data_len(&self) -> u32 {
        self.data_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_header_layout() {
        let header = build_wav_header(1000, 24_000);

        assert_eq!(header.len(), WAV_HEADER_LEN);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(header[4..8].try_into().unwrap()), 1036);
        assert_eq!(&header[8..12], b"WAVE");
        assert_eq!(&header[12..16], b"fmt ");
        assert_eq!(u16::from_le_bytes(header[20..22].try_into().unwrap()), 1);
        assert_eq!(u16::from_le_bytes(header[22..24].try_into().unwrap()), 1);
        assert_eq!(
            u32::from_le_bytes(header[24..28].try_into().unwrap()),
            24_000
        );
        assert_eq!(
            u32::from_le_bytes(header[28..32].try_into().unwrap()),
            48_000
        );
        assert_eq!(u16::from_le_bytes(header[32..34].try_into().unwrap()), 2);
        assert_eq!(u16::from_le_bytes(header[34..36].try_into().unwrap()), 16);
        assert_eq!(&header[36..40], b"data");
        assert_eq!(u32::from_le_bytes(header[40..44].try_into().unwrap()), 1000);
    }

    #[test]
    fn test_header_parses_with_wav_crate() {
        // Independent check: a third-party reader accepts the header.
        let pcm: Vec<u8> = (0..64u8).collect();
        let mut bytes = build_wav_header(pcm.len() as u32, 24_000).to_vec();
        bytes.extend_from_slice(&pcm);

        let (header, data) = wav::read(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(header.audio_format, 1);
        assert_eq!(header.channel_count, 1);
        assert_eq!(header.sampling_rate, 24_000);
        assert_eq!(header.bits_per_sample, 16);
        match data {
            wav::BitDepth::Sixteen(samples) => assert_eq!(samples.len(), 32),
            other => panic!("unexpected bit depth: {:?}", other),
        }
    }

    #[test]
    fn test_strip_wav_header() {
        let pcm = vec![1u8, 2, 3, 4];
        let mut bytes = build_wav_header(pcm.len() as u32, 24_000).to_vec();
        bytes.extend_from_slice(&pcm);

        let payload = strip_wav_header(&bytes).unwrap().unwrap();
        assert_eq!(payload, &pcm[..]);
    }

    #[test]
    fn test_strip_rejects_foreign_format() {
        let mut bytes = build_wav_header(4, 24_000).to_vec();
        bytes[22..24].copy_from_slice(&2u16.to_le_bytes()); // stereo
        bytes.extend_from_slice(&[0u8; 4]);

        assert!(strip_wav_header(&bytes).unwrap().is_err());
    }

    #[test]
    fn test_strip_passes_raw_pcm_through() {
        // Raw PCM is not a container; caller falls back to direct decode.
        assert!(strip_wav_header(&[0u8; 100]).is_none());
    }

    #[test]
    fn test_recorder_roundtrip() {
        let path =
            std::env::temp_dir().join(format!("wav-recorder-test-{}.wav", uuid::Uuid::new_v4()));

        let mut recorder = WavRecorder::create(&path, 24_000).unwrap();
        recorder.write_frame(&[0u8; 128]).unwrap();
        recorder.write_frame(&[0u8; 64]).unwrap();
        assert_eq!(recorder.data_len(), 192);
        recorder.finalize().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), WAV_HEADER_LEN + 192);
        assert_eq!(u32::from_le_bytes(bytes[40..44].try_into().unwrap()), 192);

        std::fs::remove_file(&path).ok();
    }
}
