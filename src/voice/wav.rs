//! Minimal PCM WAV encoding and duration probing

use std::time::Duration;

/// Encode mono 16-bit PCM samples as a WAV file.
pub fn encode_pcm16(samples: &[i16], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let byte_rate = sample_rate * 2;

    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&1u16.to_le_bytes()); // mono
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes()); // block align
    out.extend_from_slice(&16u16.to_le_bytes()); // bits per sample

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

fn u32_at(bytes: &[u8], pos: usize) -> Option<u32> {
    let b = bytes.get(pos..pos + 4)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Playing time of a RIFF/WAVE file, from its byte rate and data size.
pub fn duration(bytes: &[u8]) -> Option<Duration> {
    if bytes.get(0..4)? != b"RIFF" || bytes.get(8..12)? != b"WAVE" {
        return None;
    }

    let mut pos = 12;
    let mut byte_rate = None;
    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = u32_at(bytes, pos + 4)? as usize;
        match id {
            b"fmt " => byte_rate = u32_at(bytes, pos + 16),
            b"data" => {
                let rate = byte_rate.filter(|r| *r > 0)?;
                let size = size.min(bytes.len() - (pos + 8));
                return Some(Duration::from_secs_f64(size as f64 / rate as f64));
            }
            _ => {}
        }
        // Chunks are word aligned.
        pos += 8 + size + (size & 1);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_clip_reports_its_duration() {
        let samples = vec![0i16; 8000 * 3 / 2];
        let wav = encode_pcm16(&samples, 8000);
        assert_eq!(wav.len(), 44 + samples.len() * 2);
        assert_eq!(duration(&wav), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_non_wav_has_no_duration() {
        assert_eq!(duration(b"OggS\0\0\0\0"), None);
        assert_eq!(duration(b""), None);
    }
}
