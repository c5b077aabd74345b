use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use super::model::{KokoroError, STYLE_DIM};

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

type StyleVector = [f32; STYLE_DIM];

/// Style vectors for every voice in a `voices-v1.0.bin` archive.
///
/// A voice holds one style vector per phoneme-sequence length, so the vector
/// is picked by token count for prosody that matches the utterance length.
pub struct VoiceStore {
    voices: HashMap<String, Vec<StyleVector>>,
}

impl VoiceStore {
    /// Load all voices from a numpy `.npz` archive (`<voice>.npy` entries).
    pub fn load(path: &Path) -> Result<Self, KokoroError> {
        let store = Self::from_reader(File::open(path)?)?;
        log::info!("Loaded {} voices from {}", store.voices.len(), path.display());
        Ok(store)
    }

    fn from_reader<R: Read + Seek>(reader: R) -> Result<Self, KokoroError> {
        let mut archive = zip::ZipArchive::new(reader)
            .map_err(|e| KokoroError::VoiceParse(format!("not a voice archive: {e}")))?;

        let mut voices = HashMap::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .map_err(|e| KokoroError::VoiceParse(format!("entry {i}: {e}")))?;
            if entry.is_dir() {
                continue;
            }

            let name = entry.name().to_string();
            let Some(voice) = name.strip_suffix(".npy").filter(|v| !v.is_empty()) else {
                log::debug!("Skipping non-voice entry {name}");
                continue;
            };
            let voice = voice.to_string();

            let mut data = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut data)
                .map_err(|e| KokoroError::VoiceParse(format!("{name}: {e}")))?;
            voices.insert(voice, parse_npy(&data, &name)?);
        }

        Ok(Self { voices })
    }

    pub fn has_voice(&self, voice: &str) -> bool {
        self.voices.contains_key(voice)
    }

    /// Style vector of `voice` for a sequence of `idx` tokens, clamped to the
    /// longest length the voice provides.
    pub fn get_style(&self, voice: &str, idx: usize) -> Result<StyleVector, KokoroError> {
        let styles = self
            .voices
            .get(voice)
            .filter(|styles| !styles.is_empty())
            .ok_or_else(|| KokoroError::VoiceNotFound(voice.to_string()))?;
        Ok(styles[idx.min(styles.len() - 1)])
    }

    /// Voice names in sorted order.
    pub fn list_voices(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.voices.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Decode a little-endian float32 `.npy` payload of shape `[N, 256]` (any
/// singleton middle axes are ignored).
fn parse_npy(data: &[u8], name: &str) -> Result<Vec<StyleVector>, KokoroError> {
    let bad = |msg: String| KokoroError::VoiceParse(format!("{name}: {msg}"));

    if data.len() < 10 || !data.starts_with(NPY_MAGIC) {
        return Err(bad("not a numpy array".to_string()));
    }

    // Format 1.0 uses a u16 header length at [8..10]; 2.0+ a u32 at [8..12].
    let (header_len, preamble) = match data[6] {
        1 => (u16::from_le_bytes([data[8], data[9]]) as usize, 10),
        _ if data.len() >= 12 => (
            u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize,
            12,
        ),
        _ => return Err(bad("truncated header".to_string())),
    };
    let payload = data
        .get(preamble + header_len..)
        .ok_or_else(|| bad(format!("header claims {header_len} bytes")))?;

    let row_bytes = STYLE_DIM * 4;
    if payload.len() % row_bytes != 0 {
        return Err(bad(format!(
            "payload of {} bytes is not a whole number of {STYLE_DIM}-float rows",
            payload.len()
        )));
    }

    Ok(payload
        .chunks_exact(row_bytes)
        .map(|row| {
            let mut style = [0f32; STYLE_DIM];
            for (value, bytes) in style.iter_mut().zip(row.chunks_exact(4)) {
                *value = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            }
            style
        })
        .collect())
}
