//! Synthetic large-context prompts sized to approximate token targets.

use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokenburn_core::{ContextCategory, Result};
use tracing::{info, warn};

/// Words per token assumed when sizing synthetic text.
pub const WORDS_PER_TOKEN: f64 = 0.75;

/// Files whose rough size estimate exceeds this are not generated.
pub const MAX_FILE_MB: f64 = 100.0;

const SENTENCES: &[&str] = &[
    "The quick brown fox jumps over the lazy dog.",
    "In the realm of artificial intelligence and machine learning,",
    "Data processing involves complex algorithms that analyze patterns,",
    "System performance metrics indicate optimal resource utilization,",
    "Advanced neural networks demonstrate remarkable capabilities in understanding,",
    "Memory bandwidth limitations affect computational throughput significantly,",
    "Optimization techniques improve model inference speed dramatically,",
    "Hardware acceleration enables faster processing of large datasets,",
    "Distributed computing architectures scale horizontally for better performance,",
    "Cache hierarchies play a crucial role in reducing memory latency,",
];

const TECH_TERMS: &[&str] = &[
    "GPU", "VRAM", "tensor", "matrix", "kernel", "bandwidth", "latency", "throughput",
    "pipeline", "cache", "buffer", "memory", "compute", "parallel", "sequential",
    "optimization", "inference", "training", "quantization", "precision", "floating-point",
    "integer", "vector",
];

/// Number of words that approximates `target_tokens`.
pub fn target_words(target_tokens: u64) -> usize {
    (target_tokens as f64 * WORDS_PER_TOKEN).round() as usize
}

/// Text of at least `target_words(target_tokens)` words built from template sentences,
/// technical-term sentences and benchmark data lines.
pub fn generate_text<R: Rng>(rng: &mut R, target_tokens: u64) -> String {
    let wanted = target_words(target_tokens);
    let mut pieces: Vec<String> = Vec::new();
    let mut word_count = 0;

    while word_count < wanted {
        let choice: f64 = rng.gen();
        let piece = if choice < 0.6 {
            SENTENCES.choose(rng).copied().unwrap_or(SENTENCES[0]).to_string()
        } else if choice < 0.8 {
            let terms: Vec<&str> = (0..rng.gen_range(5..=15))
                .filter_map(|_| TECH_TERMS.choose(rng).copied())
                .collect();
            format!("The {} operations require careful consideration.", terms.join(" "))
        } else {
            format!(
                "Benchmark result {}: {:.2} tokens/sec at {}% utilization.",
                rng.gen_range(1..=1000),
                rng.gen_range(10.0..1000.0),
                rng.gen_range(50..=100)
            )
        };
        word_count += piece.split_whitespace().count();
        pieces.push(piece);
    }

    pieces.join(" ")
}

/// One row of `prompt_stats.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptFileStats {
    pub category: ContextCategory,
    pub label: String,
    pub target_tokens: u64,
    pub actual_words: usize,
    pub file_size_mb: f64,
    pub filename: PathBuf,
}

/// RNG for one prompt file, so each file's text is independent of which others exist.
pub fn file_rng(seed: u64, target_tokens: u64) -> StdRng {
    StdRng::seed_from_u64(seed ^ target_tokens.wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

/// Writes the `context_prompts/<category>/prompt_<label>.txt` tree.
pub struct ContextPromptGenerator {
    base_dir: PathBuf,
    seed: u64,
    overwrite: bool,
}

impl ContextPromptGenerator {
    pub fn new(base_dir: impl Into<PathBuf>, seed: u64) -> Self {
        Self {
            base_dir: base_dir.into(),
            seed,
            overwrite: false,
        }
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn stats_path(&self) -> PathBuf {
        self.base_dir.join("prompt_stats.json")
    }

    pub fn generate(&self, categories: &[ContextCategory]) -> Result<Vec<PromptFileStats>> {
        std::fs::create_dir_all(&self.base_dir)?;
        let mut stats = Vec::new();

        for category in categories {
            let category_dir = self.base_dir.join(category.label());
            std::fs::create_dir_all(&category_dir)?;
            info!(category = %category, "Generating context prompts");

            for &(target_tokens, label) in category.sizes() {
                let expected_mb = target_tokens as f64 * 4.0 / 1024.0 / 1024.0;
                if expected_mb > MAX_FILE_MB {
                    warn!(label, expected_mb, "Skipping prompt, estimated file too large");
                    continue;
                }

                let path = category_dir.join(format!("prompt_{}.txt", label));
                if path.exists() && !self.overwrite {
                    info!(label, path = %path.display(), "Keeping existing prompt file");
                } else {
                    let text = generate_text(&mut file_rng(self.seed, target_tokens), target_tokens);
                    std::fs::write(&path, &text)?;
                }

                stats.push(file_stats(*category, label, target_tokens, &path)?);
            }
        }

        std::fs::write(self.stats_path(), serde_json::to_string_pretty(&stats)?)?;
        info!(count = stats.len(), path = %self.stats_path().display(), "Saved prompt statistics");
        Ok(stats)
    }
}

fn file_stats(category: ContextCategory, label: &str, target_tokens: u64, path: &Path) -> Result<PromptFileStats> {
    let text = std::fs::read_to_string(path)?;
    let size = std::fs::metadata(path)?.len();
    Ok(PromptFileStats {
        category,
        label: label.to_string(),
        target_tokens,
        actual_words: text.split_whitespace().count(),
        file_size_mb: size as f64 / 1024.0 / 1024.0,
        filename: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_words() {
        assert_eq!(target_words(1024), 768);
        assert_eq!(target_words(1), 1);
        assert_eq!(target_words(0), 0);
    }

    #[test]
    fn test_generated_text_reaches_target() {
        let mut rng = StdRng::seed_from_u64(7);
        let text = generate_text(&mut rng, 2048);
        let words = text.split_whitespace().count();
        assert!(words >= 1536, "only {} words", words);
        // A single piece is at most ~20 words, so overshoot stays small.
        assert!(words < 1536 + 25, "{} words", words);
    }

    #[test]
    fn test_generation_is_seeded() {
        let a = generate_text(&mut StdRng::seed_from_u64(1000), 512);
        let b = generate_text(&mut StdRng::seed_from_u64(1000), 512);
        let c = generate_text(&mut StdRng::seed_from_u64(1001), 512);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_generator_writes_tree_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let generator = ContextPromptGenerator::new(dir.path(), 1);
        let stats = generator.generate(&[ContextCategory::Small]).unwrap();

        assert_eq!(stats.len(), 4);
        assert!(dir.path().join("small/prompt_1k.txt").is_file());
        assert!(dir.path().join("small/prompt_8k.txt").is_file());
        assert!(stats[0].actual_words >= 768);

        let raw = std::fs::read_to_string(generator.stats_path()).unwrap();
        let parsed: Vec<PromptFileStats> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed[3].label, "8k");
        assert_eq!(parsed[3].category, ContextCategory::Small);
    }

    #[test]
    fn test_generator_keeps_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let small = dir.path().join("small");
        std::fs::create_dir_all(&small).unwrap();
        std::fs::write(small.join("prompt_1k.txt"), "kept as is").unwrap();

        ContextPromptGenerator::new(dir.path(), 1)
            .generate(&[ContextCategory::Small])
            .unwrap();
        assert_eq!(std::fs::read_to_string(small.join("prompt_1k.txt")).unwrap(), "kept as is");

        ContextPromptGenerator::new(dir.path(), 1)
            .overwrite(true)
            .generate(&[ContextCategory::Small])
            .unwrap();
        assert_ne!(std::fs::read_to_string(small.join("prompt_1k.txt")).unwrap(), "kept as is");
    }

    #[test]
    fn test_regenerating_one_file_reproduces_it() {
        let dir = tempfile::tempdir().unwrap();
        let generator = ContextPromptGenerator::new(dir.path(), 1000);
        generator.generate(&[ContextCategory::Small]).unwrap();

        let four_k = dir.path().join("small/prompt_4k.txt");
        let original = std::fs::read_to_string(&four_k).unwrap();
        std::fs::remove_file(&four_k).unwrap();

        generator.generate(&[ContextCategory::Small]).unwrap();
        assert_eq!(std::fs::read_to_string(&four_k).unwrap(), original);

        let other = tempfile::tempdir().unwrap();
        let medium_first = ContextPromptGenerator::new(other.path(), 1000);
        medium_first
            .generate(&[ContextCategory::Medium, ContextCategory::Small])
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(other.path().join("small/prompt_4k.txt")).unwrap(),
            original
        );
    }
}
