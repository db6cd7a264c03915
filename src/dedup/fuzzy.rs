//! Weighted-ratio string similarity
//!
//! Scores are in `[0, 100]`. Strings are compared as given: callers
//! normalize case and whitespace beforehand.

use std::collections::BTreeSet;

/// Indel-normalized similarity of two strings.
///
/// `200 * lcs / (len_a + len_b)`; two empty strings score 100.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    ratio_chars(&a, &b)
}

fn ratio_chars(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }
    200.0 * lcs_len(a, b) as f64 / total as f64
}

/// Length of the longest common subsequence.
fn lcs_len(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                curr[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Best [`ratio`] of the shorter string against any window of the longer.
///
/// Windows include the partial overlaps at either end of the longer string.
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() || b.is_empty() {
        return if a.is_empty() && b.is_empty() { 100.0 } else { 0.0 };
    }
    if a.len() == b.len() {
        return partial_windows(&a, &b).max(partial_windows(&b, &a));
    }
    let (short, long) = if a.len() < b.len() { (&a, &b) } else { (&b, &a) };
    partial_windows(short, long)
}

fn partial_windows(short: &[char], long: &[char]) -> f64 {
    let m = short.len() as isize;
    let n = long.len() as isize;
    let mut best: f64 = 0.0;
    for start in (1 - m)..n {
        let lo = start.max(0) as usize;
        let hi = (start + m).min(n) as usize;
        let score = ratio_chars(short, &long[lo..hi]);
        if score > best {
            best = score;
            if best >= 100.0 {
                break;
            }
        }
    }
    best
}

fn tokens(s: &str) -> BTreeSet<&str> {
    s.split_whitespace().collect()
}

fn sorted_tokens(s: &str) -> String {
    let mut words: Vec<&str> = s.split_whitespace().collect();
    words.sort_unstable();
    words.join(" ")
}

fn join(set: &BTreeSet<&str>) -> String {
    set.iter().copied().collect::<Vec<_>>().join(" ")
}

/// [`ratio`] after sorting the words of both strings.
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    ratio(&sorted_tokens(a), &sorted_tokens(b))
}

/// Compares the shared words against each side's extra words.
///
/// 100 when one string's words are a subset of the other's.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let ta = tokens(a);
    let tb = tokens(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let common: BTreeSet<&str> = ta.intersection(&tb).copied().collect();
    let only_a: BTreeSet<&str> = ta.difference(&tb).copied().collect();
    let only_b: BTreeSet<&str> = tb.difference(&ta).copied().collect();

    if !common.is_empty() && (only_a.is_empty() || only_b.is_empty()) {
        return 100.0;
    }

    let sect = join(&common);
    let with = |rest: &BTreeSet<&str>| {
        if sect.is_empty() {
            join(rest)
        } else {
            format!("{} {}", sect, join(rest))
        }
    };
    let combined_a = with(&only_a);
    let combined_b = with(&only_b);

    let mut best = ratio(&combined_a, &combined_b);
    if !sect.is_empty() {
        best = best
            .max(ratio(&sect, &combined_a))
            .max(ratio(&sect, &combined_b));
    }
    best
}

/// [`partial_ratio`] over sorted words and over the non-shared words.
pub fn partial_token_ratio(a: &str, b: &str) -> f64 {
    let ta = tokens(a);
    let tb = tokens(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    if ta.intersection(&tb).next().is_some() {
        return 100.0;
    }
    // Disjoint word sets: the differences are the sets themselves, so only
    // duplicate words can make the two comparisons differ.
    let sorted = partial_ratio(&sorted_tokens(a), &sorted_tokens(b));
    let deduped = partial_ratio(&join(&ta), &join(&tb));
    sorted.max(deduped)
}

/// Weighted ratio: picks the best of the measures above for the length mix.
///
/// Similar-length strings are scored on whole-string and word-order-
/// insensitive ratios; when one string is much longer, substring matches
/// count too, discounted more as the length gap grows.
pub fn wratio(a: &str, b: &str) -> f64 {
    let len_a = a.chars().count();
    let len_b = b.chars().count();
    if len_a == 0 || len_b == 0 {
        return 0.0;
    }

    const UNBASE_SCALE: f64 = 0.95;
    let len_ratio = len_a.max(len_b) as f64 / len_a.min(len_b) as f64;
    let mut best = ratio(a, b);

    if len_ratio < 1.5 {
        let token = token_sort_ratio(a, b).max(token_set_ratio(a, b));
        return best.max(token * UNBASE_SCALE);
    }

    let partial_scale = if len_ratio < 8.0 { 0.9 } else { 0.6 };
    best = best.max(partial_ratio(a, b) * partial_scale);
    best.max(partial_token_ratio(a, b) * UNBASE_SCALE * partial_scale)
}
