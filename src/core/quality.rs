//! Artifact validation: structural quality score, length and near-duplicate checks.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::core::generation::GeneratedContent;

/// Points awarded per factor; the total is capped at 100.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// Keyword placement and title length (max 20).
    pub title: u32,
    /// Keyword in meta description and its length (max 15).
    pub meta: u32,
    /// Body length bands (max 15).
    pub length: u32,
    /// Keyword density and early placement (max 20).
    pub keyword: u32,
    /// Reading ease band (max 15).
    pub readability: u32,
    /// Headings and lists (max 15).
    pub structure: u32,
}

impl ScoreBreakdown {
    /// Sum of all factors, at most 100.
    pub fn total(&self) -> f64 {
        let sum = self.title + self.meta + self.length + self.keyword + self.readability + self.structure;
        f64::from(sum.min(100))
    }
}

/// Number of whitespace-separated words.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn syllables(word: &str) -> usize {
    let mut count = 0;
    let mut prev_vowel = false;
    for c in word.chars().flat_map(char::to_lowercase) {
        let vowel = matches!(c, 'a' | 'e' | 'i' | 'o' | 'u' | 'y');
        if vowel && !prev_vowel {
            count += 1;
        }
        prev_vowel = vowel;
    }
    count.max(1)
}

/// Flesch reading ease (higher is easier), clamped to 0-100.
#[allow(clippy::cast_precision_loss)]
pub fn reading_ease(text: &str) -> f64 {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return 0.0;
    }
    let sentences = text
        .split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count()
        .max(1);
    let syllable_total: usize = words.iter().map(|w| syllables(w)).sum();
    let wps = words.len() as f64 / sentences as f64;
    let spw = syllable_total as f64 / words.len() as f64;
    1.015f64.mul_add(-wps, 84.6f64.mul_add(-spw, 206.835)).clamp(0.0, 100.0)
}

/// Occurrences of `keyword` per 100 words.
#[allow(clippy::cast_precision_loss)]
pub fn keyword_density(text: &str, keyword: &str) -> f64 {
    let words = word_count(text);
    if words == 0 || keyword.trim().is_empty() {
        return 0.0;
    }
    let hits = text.to_lowercase().matches(&keyword.to_lowercase()).count();
    hits as f64 * 100.0 / words as f64
}

/// Structural quality score of generated content against its primary keyword.
pub fn score(content: &GeneratedContent) -> ScoreBreakdown {
    let keyword = content
        .keywords
        .first()
        .map(|k| k.to_lowercase())
        .unwrap_or_default();
    let has_keyword = !keyword.is_empty();
    let title = content.title.to_lowercase();
    let meta = content.meta_description.to_lowercase();
    let body = &content.body;
    let mut b = ScoreBreakdown::default();

    if has_keyword && title.contains(&keyword) {
        b.title += 10;
    }
    if (40..=70).contains(&content.title.chars().count()) {
        b.title += 5;
    }
    let prefix: String = keyword.chars().take(10).collect();
    if has_keyword && title.starts_with(&prefix) {
        b.title += 5;
    }

    if has_keyword && meta.contains(&keyword) {
        b.meta += 8;
    }
    if (120..=160).contains(&content.meta_description.chars().count()) {
        b.meta += 7;
    }

    b.length = match word_count(body) {
        n if n >= 2000 => 15,
        n if n >= 1500 => 12,
        n if n >= 1000 => 8,
        n if n >= 500 => 5,
        _ => 0,
    };

    if has_keyword {
        let density = keyword_density(body, &keyword);
        b.keyword += if (1.0..=2.5).contains(&density) {
            15
        } else if (0.5..=3.0).contains(&density) {
            10
        } else if density > 0.0 {
            5
        } else {
            0
        };
        let opening: String = body
            .split_whitespace()
            .take(100)
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        if opening.contains(&keyword) {
            b.keyword += 5;
        }
    }

    let ease = reading_ease(body);
    b.readability = if (50.0..=70.0).contains(&ease) {
        15
    } else if (40.0..=80.0).contains(&ease) {
        10
    } else if ease > 30.0 {
        5
    } else {
        0
    };

    let h2 = body.matches("<h2>").count()
        + body.lines().filter(|l| l.trim_start().starts_with("## ")).count();
    let h3 = body.contains("<h3>") || body.lines().any(|l| l.trim_start().starts_with("### "));
    let list = body.contains("<ul>")
        || body.contains("<ol>")
        || body
            .lines()
            .any(|l| l.trim_start().starts_with("- ") || l.trim_start().starts_with("* "));
    if h2 > 0 {
        b.structure += 5;
    }
    if h3 {
        b.structure += 3;
    }
    if list {
        b.structure += 4;
    }
    if h2 >= 3 {
        b.structure += 3;
    }
    b
}

fn shingles(text: &str) -> HashSet<String> {
    let words: Vec<String> = text
        .split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric())
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|w| !w.is_empty())
        .collect();
    if words.len() < 3 {
        return words.into_iter().collect();
    }
    words.windows(3).map(|w| w.join(" ")).collect()
}

/// Jaccard similarity of word 3-shingles, 0 (disjoint) to 1 (identical).
#[allow(clippy::cast_precision_loss)]
pub fn similarity(a: &str, b: &str) -> f64 {
    let sa = shingles(a);
    let sb = shingles(b);
    if sa.is_empty() && sb.is_empty() {
        return 1.0;
    }
    let inter = sa.intersection(&sb).count();
    let union = sa.union(&sb).count();
    if union == 0 {
        0.0
    } else {
        inter as f64 / union as f64
    }
}
