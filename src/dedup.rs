// src/dedup.rs
//! Text normalization and near-duplicate similarity.
//!
//! Every text stored in or compared against the recent-content ring goes
//! through [`normalize_text`] first; [`similarity`] is only meaningful on
//! normalized input.
//!
//! Similarity is the matching-block ratio `2*M / (len(a) + len(b))`, where
//! `M` counts characters in the blocks found by recursively taking the
//! longest common substring (Ratcliff/Obershelp), left and right of it.

use once_cell::sync::OnceCell;
use regex::Regex;

/// Default similarity above which two texts count as the same story.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.8;

/// Normalize text for comparison:
/// strip `<...>` tags, turn anything that is not a letter/ideograph/digit/
/// whitespace into a space, collapse whitespace, trim, lowercase.
pub fn normalize_text(s: &str) -> String {
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    static RE_PUNCT: OnceCell<Regex> = OnceCell::new();
    static RE_WS: OnceCell<Regex> = OnceCell::new();

    // 1) Strip markup-like tags
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"<.*?>").unwrap());
    let out = re_tags.replace_all(s, "");

    // 2) Punctuation/symbols -> space (`\w` is Unicode-aware, covers CJK)
    let re_punct = RE_PUNCT.get_or_init(|| Regex::new(r"[^\w\s]").unwrap());
    let out = re_punct.replace_all(&out, " ");

    // 3) Collapse whitespace
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").unwrap());
    let out = re_ws.replace_all(&out, " ");

    out.trim().to_lowercase()
}

/// Matching-block ratio between two normalized strings, in `[0.0, 1.0]`.
/// Two empty strings score 1.0.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matched_chars(&a, &b) as f64 / total as f64
}

/// Sum of matching block lengths.
fn matched_chars(a: &[char], b: &[char]) -> usize {
    let mut pending = vec![(0, a.len(), 0, b.len())];
    let mut matched = 0;
    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, k) = longest_match(a, b, alo, ahi, blo, bhi);
        if k == 0 {
            continue;
        }
        matched += k;
        if alo < i && blo < j {
            pending.push((alo, i, blo, j));
        }
        if i + k < ahi && j + k < bhi {
            pending.push((i + k, ahi, j + k, bhi));
        }
    }
    matched
}

/// Longest common substring of `a[alo..ahi]` and `b[blo..bhi]` as
/// `(start_a, start_b, len)`. Ties go to the earliest start in `a`, then in `b`.
fn longest_match(
    a: &[char],
    b: &[char],
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let width = bhi - blo + 1;
    let mut best = (alo, blo, 0);
    // run[j - blo + 1]: length of the common run ending at (i, j)
    let mut prev = vec![0usize; width];
    let mut cur = vec![0usize; width];
    for i in alo..ahi {
        for j in blo..bhi {
            let k = if a[i] == b[j] { prev[j - blo] + 1 } else { 0 };
            cur[j - blo + 1] = k;
            if k > best.2 {
                best = (i + 1 - k, j + 1 - k, k);
            }
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    best
}
