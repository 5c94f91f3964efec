use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tokenburn_core::{ContextCategory, PromptCase, PromptConfig, Result, TokenBurnError};
use tracing::{debug, info, warn};

const PHI: f64 = 1.618_033_988_749_895;

/// Which end of the source text each prompt is cut from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceDirection {
    Prefix,
    Suffix,
}

impl SliceDirection {
    pub fn from_reverse(reverse: bool) -> Self {
        if reverse {
            SliceDirection::Suffix
        } else {
            SliceDirection::Prefix
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SliceDirection::Prefix => "prefix",
            SliceDirection::Suffix => "suffix",
        }
    }
}

fn word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\S+\s*").expect("static regex"))
}

fn digits_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").expect("static regex"))
}

/// Split text into words that keep their trailing whitespace.
pub fn split_words(text: &str) -> Vec<&str> {
    word_regex().find_iter(text).map(|m| m.as_str()).collect()
}

/// Golden-ratio spaced prompt lengths, strictly increasing and ending at `total`.
pub fn golden_lengths(total: usize, count: usize) -> Result<Vec<usize>> {
    if count == 0 || count > total {
        return Err(TokenBurnError::InvalidPromptCount {
            requested: count,
            available: total,
        });
    }

    let mut lengths: Vec<usize> = (0..count)
        .map(|i| {
            let exponent = (count - i - 1) as i32;
            let length = (total as f64 / PHI.powi(exponent)).round() as usize;
            length.max(1)
        })
        .collect();
    lengths[count - 1] = total;

    for i in 1..count {
        if lengths[i] <= lengths[i - 1] {
            lengths[i] = lengths[i - 1] + 1;
        }
    }

    Ok(lengths)
}

/// Cut `count` prompts of increasing length out of `source`.
pub fn slice_prompts(source: &str, count: usize, direction: SliceDirection) -> Result<Vec<String>> {
    let words = split_words(source);
    if words.is_empty() {
        return Err(TokenBurnError::MissingInput("source text is empty".to_string()));
    }

    let lengths = golden_lengths(words.len(), count)?;
    let prompts = lengths
        .iter()
        .map(|&length| {
            let snippet = match direction {
                SliceDirection::Prefix => &words[..length],
                SliceDirection::Suffix => &words[words.len() - length..],
            };
            snippet.concat()
        })
        .collect();

    Ok(prompts)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum KeyPart {
    Number(u128),
    Text(String),
}

impl PartialOrd for KeyPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyPart {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (KeyPart::Number(a), KeyPart::Number(b)) => a.cmp(b),
            (KeyPart::Text(a), KeyPart::Text(b)) => a.cmp(b),
            (KeyPart::Number(_), KeyPart::Text(_)) => Ordering::Less,
            (KeyPart::Text(_), KeyPart::Number(_)) => Ordering::Greater,
        }
    }
}

fn natural_key(name: &str) -> Vec<KeyPart> {
    let mut parts = Vec::new();
    let mut last = 0;
    for m in digits_regex().find_iter(name) {
        if m.start() > last {
            parts.push(KeyPart::Text(name[last..m.start()].to_string()));
        }
        match m.as_str().parse::<u128>() {
            Ok(n) => parts.push(KeyPart::Number(n)),
            Err(_) => parts.push(KeyPart::Text(m.as_str().to_string())),
        }
        last = m.end();
    }
    if last < name.len() {
        parts.push(KeyPart::Text(name[last..].to_string()));
    }
    parts
}

/// Compare file names so that `2.txt` sorts before `10.txt`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    natural_key(a).cmp(&natural_key(b))
}

/// `.txt` files of a directory in natural order.
pub fn list_text_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "txt") {
            files.push(path);
        }
    }
    files.sort_by(|a, b| natural_cmp(&file_name(a), &file_name(b)));
    Ok(files)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Supplies the prompts of a sweep, reusing materialised prompt files when present.
#[derive(Debug, Clone)]
pub struct PromptProvisioner {
    source_file: PathBuf,
    prompts_dir: PathBuf,
    count: usize,
    direction: SliceDirection,
}

impl PromptProvisioner {
    pub fn new(
        source_file: impl Into<PathBuf>,
        prompts_dir: impl Into<PathBuf>,
        count: usize,
        direction: SliceDirection,
    ) -> Self {
        Self {
            source_file: source_file.into(),
            prompts_dir: prompts_dir.into(),
            count,
            direction,
        }
    }

    pub fn from_config(config: &PromptConfig) -> Self {
        Self::new(
            &config.source_file,
            &config.prompts_dir,
            config.count,
            SliceDirection::from_reverse(config.reverse),
        )
    }

    pub fn prompts_dir(&self) -> &Path {
        &self.prompts_dir
    }

    /// Load existing prompt files, or generate and persist them from the source text.
    pub fn provision(&self) -> Result<Vec<PromptCase>> {
        let existing = self.load_existing()?;
        if !existing.is_empty() {
            info!(
                count = existing.len(),
                dir = %self.prompts_dir.display(),
                "Reusing materialised prompts"
            );
            return Ok(PromptCase::numbered(existing));
        }

        let prompts = self.generate()?;
        Ok(PromptCase::numbered(prompts))
    }

    fn load_existing(&self) -> Result<Vec<String>> {
        if !self.prompts_dir.is_dir() {
            return Ok(Vec::new());
        }

        list_text_files(&self.prompts_dir)?
            .iter()
            .map(|path| std::fs::read_to_string(path).map_err(TokenBurnError::from))
            .collect()
    }

    fn generate(&self) -> Result<Vec<String>> {
        if !self.source_file.is_file() {
            return Err(TokenBurnError::MissingInput(format!(
                "no prompts in {} and source file {} not found",
                self.prompts_dir.display(),
                self.source_file.display()
            )));
        }

        let source = std::fs::read_to_string(&self.source_file)?;
        let prompts = slice_prompts(&source, self.count, self.direction)?;

        std::fs::create_dir_all(&self.prompts_dir)?;
        for (idx, prompt) in prompts.iter().enumerate() {
            let path = self.prompts_dir.join(format!("{}.txt", idx + 1));
            std::fs::write(&path, prompt)?;
            debug!(
                "Prompt {} ({} {} words) -> {}",
                idx + 1,
                self.direction.label(),
                split_words(prompt).len(),
                path.display()
            );
        }

        info!(
            count = prompts.len(),
            "Generated prompts. Delete {} to regenerate.",
            self.prompts_dir.display()
        );
        Ok(prompts)
    }
}

/// Large-context prompt files for the given categories, labelled by size (`4k`, `128k`, ...).
pub fn load_context_cases(context_dir: &Path, categories: &[ContextCategory]) -> Result<Vec<PromptCase>> {
    if !context_dir.is_dir() {
        return Err(TokenBurnError::MissingInput(format!(
            "{} not found; run `tokenburn generate-prompts` first",
            context_dir.display()
        )));
    }

    let mut cases = Vec::new();
    for category in categories {
        let category_dir = context_dir.join(category.label());
        if !category_dir.is_dir() {
            warn!(category = %category, "No prompt directory for category, skipping");
            continue;
        }

        let mut found: Vec<(usize, String, PathBuf)> = Vec::new();
        for path in list_text_files(&category_dir)? {
            let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            let Some(label) = stem.strip_prefix("prompt_") else {
                continue;
            };
            // Known sizes in ascending token order, anything else after them.
            let rank = category
                .sizes()
                .iter()
                .position(|(_, known)| *known == label)
                .unwrap_or(usize::MAX);
            found.push((rank, label.to_string(), path));
        }
        found.sort_by_key(|(rank, _, _)| *rank);

        for (_, label, path) in found {
            let text = std::fs::read_to_string(&path)?;
            cases.push(PromptCase::new(label, text));
        }
    }

    Ok(cases)
}
