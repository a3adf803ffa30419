//! Pre-authored attention-check stimuli.
//!
//! The bank directory holds one folder per pair, named `<a>_<b>`, with one
//! image per label whose file stem is the label (`happy_sad/happy.png`,
//! `happy_sad/sad.png`). Images are held in memory as data URLs.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::seq::SliceRandom;
use rand::Rng;
use std::path::Path;
use tracing::{info, warn};

use crate::domain::errors::{DomainError, DomainResult};

/// Two stimuli that discriminate two categories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttentionPair {
    pub labels: [String; 2],
    /// Data URLs, in label order
    pub images: [String; 2],
}

impl AttentionPair {
    pub fn involves(&self, category: &str) -> bool {
        self.labels.iter().any(|label| label == category)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AttentionCheckBank {
    pairs: Vec<AttentionPair>,
}

fn mime_type(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "svg" => Some("image/svg+xml"),
        _ => None,
    }
}

fn read_image(dir: &Path, label: &str) -> DomainResult<Option<String>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| DomainError::ValidationFailed(format!("{}: {e}", dir.display())))?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.file_stem().and_then(|s| s.to_str()) != Some(label) {
            continue;
        }
        let Some(mime) = mime_type(&path) else {
            continue;
        };
        let bytes = std::fs::read(&path)
            .map_err(|e| DomainError::ValidationFailed(format!("{}: {e}", path.display())))?;
        return Ok(Some(format!("data:{mime};base64,{}", STANDARD.encode(bytes))));
    }
    Ok(None)
}

impl AttentionCheckBank {
    /// Load every `<a>_<b>` folder under `dir`. Incomplete folders are skipped.
    pub fn load(dir: &Path) -> DomainResult<Self> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| DomainError::ValidationFailed(format!("attention checks {}: {e}", dir.display())))?;

        let mut pairs = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some((a, b)) = path.file_name().and_then(|n| n.to_str()).and_then(|n| n.split_once('_')) else {
                warn!(path = %path.display(), "attention check folder is not named <a>_<b>");
                continue;
            };
            match (read_image(&path, a)?, read_image(&path, b)?) {
                (Some(first), Some(second)) => pairs.push(AttentionPair {
                    labels: [a.to_string(), b.to_string()],
                    images: [first, second],
                }),
                _ => warn!(path = %path.display(), "attention check folder is missing an image"),
            }
        }

        pairs.sort_by(|x, y| x.labels.cmp(&y.labels));
        info!(pairs = pairs.len(), dir = %dir.display(), "loaded attention checks");
        Ok(Self { pairs })
    }

    pub fn from_pairs(pairs: Vec<AttentionPair>) -> Self {
        Self { pairs }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs_for<'s, 'c>(&'s self, category: &'c str) -> impl Iterator<Item = &'s AttentionPair> + 'c
    where
        's: 'c,
    {
        self.pairs.iter().filter(move |pair| pair.involves(category))
    }

    /// A random pair involving `category`, if any.
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R, category: &str) -> Option<&AttentionPair> {
        let candidates: Vec<&AttentionPair> = self.pairs.iter().filter(|pair| pair.involves(category)).collect();
        candidates.choose(rng).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn write_pair(root: &Path, a: &str, b: &str) {
        let dir = root.join(format!("{a}_{b}"));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(format!("{a}.png")), b"first").unwrap();
        std::fs::write(dir.join(format!("{b}.jpg")), b"second").unwrap();
    }

    #[test]
    fn test_load_pairs() {
        let root = tempfile::tempdir().unwrap();
        write_pair(root.path(), "happy", "sad");
        write_pair(root.path(), "angry", "sad");
        std::fs::create_dir_all(root.path().join("incomplete_pair")).unwrap();
        std::fs::create_dir_all(root.path().join("noseparator")).unwrap();

        let bank = AttentionCheckBank::load(root.path()).unwrap();
        assert_eq!(bank.len(), 2);

        let pair = bank.pairs_for("happy").next().unwrap();
        assert_eq!(pair.labels, ["happy".to_string(), "sad".to_string()]);
        assert_eq!(pair.images[0], format!("data:image/png;base64,{}", STANDARD.encode(b"first")));
        assert!(pair.images[1].starts_with("data:image/jpeg;base64,"));
        assert_eq!(bank.pairs_for("sad").count(), 2);
    }

    #[test]
    fn test_choose_respects_category() {
        let bank = AttentionCheckBank::from_pairs(vec![AttentionPair {
            labels: ["happy".into(), "sad".into()],
            images: ["a".into(), "b".into()],
        }]);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(bank.choose(&mut rng, "sad").is_some());
        assert!(bank.choose(&mut rng, "angry").is_none());
    }

    #[test]
    fn test_chosen_pair_outlives_category() {
        let bank = AttentionCheckBank::from_pairs(vec![AttentionPair {
            labels: ["happy".into(), "sad".into()],
            images: ["a".into(), "b".into()],
        }]);
        let mut rng = StdRng::seed_from_u64(2);
        let pair = {
            let category = String::from("happy");
            bank.choose(&mut rng, &category)
        };
        assert_eq!(pair.map(|pair| pair.images[0].as_str()), Some("a"));
    }

    #[test]
    fn test_missing_dir_is_an_error() {
        assert!(AttentionCheckBank::load(Path::new("/nonexistent/attention")).is_err());
    }
}
