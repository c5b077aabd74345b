use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use super::model::KokoroError;

/// Kokoro token ids as runs of consecutive ids: `(first_id, symbols)`.
///
/// Mirrors the `vocab` table of the model's config.json.
const VOCAB_RUNS: &[(i64, &str)] = &[
    (1, ";:,.!?"),
    (9, "—…\"()\u{201c}\u{201d} "),
    (17, "\u{0303}ʣʥʦʨᵝꭧ"),
    (24, "AI"),
    (31, "O"),
    (33, "Q"),
    (35, "ST"),
    (39, "W"),
    (41, "Yᵊabcdef"),
    (50, "hijklmnopqrstuvwxyzɑɐɒæ"),
    (75, "βɔɕç"),
    (80, "ɖðʤə"),
    (85, "ɚɛɜ"),
    (90, "ɟ"),
    (92, "ɡ"),
    (99, "ɥ"),
    (101, "ɨɪʝ"),
    (110, "ɯɰŋɳɲɴø"),
    (118, "ɸθœ"),
    (123, "ɹ"),
    (125, "ɾɻ"),
    (128, "ʁɽʂʃʈʧ"),
    (135, "ʊʋ"),
    (138, "ʌɣɤ"),
    (142, "χʎ"),
    (147, "ʒʔ"),
    (156, "ˈˌː"),
    (162, "ʰ"),
    (164, "ʲ"),
    (169, "↓"),
    (171, "→↗↘"),
    (177, "ᵻ"),
];

#[derive(Deserialize)]
struct ModelConfig {
    vocab: HashMap<String, i64>,
}

/// Load the vocabulary from the model's config.json.
pub fn load_vocab(config_path: &Path) -> Result<HashMap<char, i64>, KokoroError> {
    let content = std::fs::read_to_string(config_path)?;
    parse_vocab(&content)
}

fn parse_vocab(json: &str) -> Result<HashMap<char, i64>, KokoroError> {
    let config: ModelConfig =
        serde_json::from_str(json).map_err(|e| KokoroError::Config(e.to_string()))?;

    config
        .vocab
        .into_iter()
        .map(|(key, id)| {
            let mut chars = key.chars();
            match (chars.next(), chars.next()) {
                (Some(ch), None) => Ok((ch, id)),
                _ => Err(KokoroError::Config(format!(
                    "vocab key {key:?} is not a single character"
                ))),
            }
        })
        .collect()
}

/// Built-in vocabulary, used when the model directory has no config.json.
pub fn hardcoded_vocab() -> HashMap<char, i64> {
    VOCAB_RUNS
        .iter()
        .flat_map(|&(first, symbols)| symbols.chars().zip(first..))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{hardcoded_vocab, parse_vocab};

    #[test]
    fn hardcoded_vocab_has_expected_ids() {
        let vocab = hardcoded_vocab();
        assert_eq!(vocab.len(), 114);
        assert_eq!(vocab[&';'], 1);
        assert_eq!(vocab[&'?'], 6);
        assert_eq!(vocab[&' '], 16);
        assert_eq!(vocab[&'\u{0303}'], 17);
        assert_eq!(vocab[&'a'], 43);
        assert_eq!(vocab[&'æ'], 72);
        assert_eq!(vocab[&'ə'], 83);
        assert_eq!(vocab[&'ø'], 116);
        assert_eq!(vocab[&'ː'], 158);
        assert_eq!(vocab[&'ᵻ'], 177);
    }

    #[test]
    fn parses_config_vocab() {
        let vocab = parse_vocab(r#"{"vocab": {"a": 43, ".": 4}, "n_token": 178}"#)
            .expect("vocab should parse");
        assert_eq!(vocab.len(), 2);
        assert_eq!(vocab[&'.'], 4);
    }

    #[test]
    fn rejects_multi_character_keys() {
        assert!(parse_vocab(r#"{"vocab": {"ab": 1}}"#).is_err());
        assert!(parse_vocab(r#"{"vocab": {"": 1}}"#).is_err());
        assert!(parse_vocab(r#"{"other": {}}"#).is_err());
    }
}
