//! Similarity strategies for last-resort registry lookups.

/// Scores how alike two identities are, from 0.0 (unrelated) to 1.0 (equal).
pub trait MatchStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn similarity(&self, a: &str, b: &str) -> f64;
}

/// Ratcliff/Obershelp ratio: `2 * matched / (len(a) + len(b))`, where
/// `matched` counts characters in recursively found longest common blocks.
///
/// # Examples
/// ```
/// use community_render::registry::matching::{MatchStrategy, SequenceRatio};
///
/// let ratio = SequenceRatio.similarity("donut_final.glb", "donut_finall.glb");
/// assert!(ratio > 0.95);
/// assert_eq!(SequenceRatio.similarity("abc", "abc"), 1.0);
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct SequenceRatio;

impl MatchStrategy for SequenceRatio {
    fn name(&self) -> &'static str {
        "sequence-ratio"
    }

    fn similarity(&self, a: &str, b: &str) -> f64 {
        let a: Vec<char> = a.chars().collect();
        let b: Vec<char> = b.chars().collect();
        let total = a.len() + b.len();
        if total == 0 {
            return 1.0;
        }
        2.0 * matching_chars(&a, &b) as f64 / total as f64
    }
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let (i, j, len) = longest_common_block(a, b);
    if len == 0 {
        return 0;
    }
    len + matching_chars(&a[..i], &b[..j]) + matching_chars(&a[i + len..], &b[j + len..])
}

/// Returns `(start_a, start_b, len)` of the leftmost longest common block.
fn longest_common_block(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];
    for i in 0..a.len() {
        for j in 0..b.len() {
            cur[j + 1] = if a[i] == b[j] { prev[j] + 1 } else { 0 };
            if cur[j + 1] > best.2 {
                best = (i + 1 - cur[j + 1], j + 1 - cur[j + 1], cur[j + 1]);
            }
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    best
}
