use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use super::model::KokoroError;

/// Where to find espeak-ng. `None` fields fall back to the system install.
#[derive(Debug, Clone, Default)]
pub struct EspeakConfig {
    pub bin_path: Option<PathBuf>,
    pub data_path: Option<PathBuf>,
}

impl EspeakConfig {
    fn command(&self) -> Command {
        let mut cmd = match &self.bin_path {
            Some(bin) => Command::new(bin),
            None => Command::new("espeak-ng"),
        };
        if let Some(data) = &self.data_path {
            cmd.env("ESPEAK_DATA_PATH", data);
        }
        cmd
    }
}

/// Map a voice name prefix to an espeak-ng language code.
///
/// Voice names follow `{prefix}_{name}`; the two-letter prefix encodes
/// language and gender.
pub fn voice_lang(voice: &str) -> &'static str {
    match voice.get(..2).unwrap_or(voice) {
        "af" | "am" => "en-us",
        "bf" | "bm" => "en-gb",
        "ef" | "em" => "es",
        "ff" => "fr",
        "hf" | "hm" => "hi",
        "if" | "im" => "it",
        "jf" | "jm" => "ja",
        "pf" | "pm" => "pt-br",
        "zf" | "zm" => "cmn",
        _ => "en-us",
    }
}

/// Convert text to Kokoro token ids.
///
/// Words go through espeak-ng in one batch; punctuation is mapped straight to
/// its token so pauses survive phonemization. IPA symbols missing from the
/// vocabulary are dropped.
pub fn phonemize(
    text: &str,
    lang: &str,
    vocab: &HashMap<char, i64>,
    espeak: &EspeakConfig,
) -> Result<Vec<i64>, KokoroError> {
    let parts = split_text_parts(text);
    let words: Vec<&str> = parts
        .iter()
        .filter_map(|part| match part {
            TextPart::Text(segment) => Some(segment.as_str()),
            TextPart::Punct(_) => None,
        })
        .collect();

    let mut word_ids = if words.is_empty() {
        Vec::new()
    } else {
        phonemize_batch(&words, lang, vocab, espeak)?
    }
    .into_iter();

    let mut ids = Vec::new();
    for part in &parts {
        match part {
            TextPart::Text(_) => ids.extend(word_ids.next().unwrap_or_default()),
            TextPart::Punct(ch) => ids.extend(vocab.get(ch)),
        }
    }
    Ok(ids)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TextPart {
    Text(String),
    Punct(char),
}

/// Split text into word runs and boundary punctuation. Decimal points and
/// thousands separators between digits stay inside the word run.
fn split_text_parts(text: &str) -> Vec<TextPart> {
    let chars: Vec<char> = text.chars().collect();
    let mut parts = Vec::new();
    let mut current = String::new();

    for (i, &ch) in chars.iter().enumerate() {
        let between_digits = matches!(ch, '.' | ',')
            && i > 0
            && chars[i - 1].is_ascii_digit()
            && chars.get(i + 1).is_some_and(char::is_ascii_digit);

        match boundary_punctuation(ch) {
            Some(punct) if !between_digits => {
                push_text(&mut parts, &mut current);
                parts.push(TextPart::Punct(punct));
            }
            _ if ch.is_whitespace() => {
                if !current.is_empty() && !current.ends_with(' ') {
                    current.push(' ');
                }
            }
            _ => current.push(ch),
        }
    }

    push_text(&mut parts, &mut current);
    parts
}

fn push_text(parts: &mut Vec<TextPart>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        parts.push(TextPart::Text(trimmed.to_string()));
    }
    current.clear();
}

fn boundary_punctuation(ch: char) -> Option<char> {
    match ch {
        '.' | '!' | '?' | ',' | ';' | ':' | '—' | '…' | '"' | '(' | ')' | '\u{201c}'
        | '\u{201d}' => Some(ch),
        '\n' | '\r' => Some('.'),
        _ => None,
    }
}

fn phonemize_batch(
    words: &[&str],
    lang: &str,
    vocab: &HashMap<char, i64>,
    espeak: &EspeakConfig,
) -> Result<Vec<Vec<i64>>, KokoroError> {
    let output = run_espeak(&words.join("\n"), lang, espeak)?;
    let lines: Vec<&str> = output.lines().collect();

    // One output line per input line is expected; otherwise go word run by word run.
    if lines.len() == words.len() {
        return Ok(lines.iter().map(|line| ipa_to_ids(line, vocab)).collect());
    }
    log::debug!(
        "espeak-ng returned {} lines for {} inputs, phonemizing individually",
        lines.len(),
        words.len()
    );
    words
        .iter()
        .map(|word| Ok(ipa_to_ids(&run_espeak(word, lang, espeak)?, vocab)))
        .collect()
}

fn run_espeak(input: &str, lang: &str, espeak: &EspeakConfig) -> Result<String, KokoroError> {
    let mut child = espeak
        .command()
        .args(["--ipa", "--stdin", "-q", "-v", lang])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => KokoroError::EspeakNotFound,
            _ => KokoroError::Io(e),
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(stdin_payload(input).as_bytes())?;
    }

    let output = child.wait_with_output()?;
    if !output.status.success() {
        return Err(KokoroError::PhonemizerFailed(format!(
            "espeak-ng exited with code {:?}: {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// espeak-ng reads stdin line by line and under-processes an unterminated
/// final line.
fn stdin_payload(input: &str) -> String {
    if input.ends_with('\n') {
        input.to_string()
    } else {
        format!("{input}\n")
    }
}

fn ipa_to_ids(ipa: &str, vocab: &HashMap<char, i64>) -> Vec<i64> {
    ipa.lines()
        .flat_map(|line| line.trim().chars())
        .filter(|&ch| ch != '_')
        .filter_map(|ch| vocab.get(&ch).copied())
        .collect()
}
