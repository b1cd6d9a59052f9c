//! Expected-output comparison and unified diffs.

use serde::{Deserialize, Serialize};

/// How a test's stdout is compared with its expected output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputComparison {
    /// Byte-for-byte equality.
    #[default]
    Exact,
    /// Line endings normalized, trailing whitespace and surrounding blank
    /// lines ignored.
    Trimmed,
}

/// Above this many line pairs the diff falls back to remove-all/add-all.
const MAX_DIFF_CELLS: usize = 4_000_000;

/// Compare `actual` against `expected`.
///
/// Returns `None` on a match, otherwise a unified diff of the compared forms.
pub fn compare_output(expected: &str, actual: &str, mode: OutputComparison) -> Option<String> {
    let (expected, actual) = match mode {
        OutputComparison::Exact => (expected.to_string(), actual.to_string()),
        OutputComparison::Trimmed => (trim_output(expected), trim_output(actual)),
    };
    if expected == actual {
        None
    } else {
        Some(unified_diff(&expected, &actual))
    }
}

fn trim_output(text: &str) -> String {
    let lines: Vec<&str> = text
        .split('\n')
        .map(|l| l.trim_end_matches('\r').trim_end())
        .collect();
    let start = lines.iter().position(|l| !l.is_empty()).unwrap_or(lines.len());
    let end = lines
        .iter()
        .rposition(|l| !l.is_empty())
        .map(|i| i + 1)
        .unwrap_or(start);
    lines[start..end].join("\n")
}

/// Line-based unified diff with a single hunk covering both texts.
pub fn unified_diff(expected: &str, actual: &str) -> String {
    let old = split_lines(expected);
    let new = split_lines(actual);

    let mut out = String::new();
    out.push_str("--- expected\n+++ actual\n");
    out.push_str(&format!(
        "@@ -{} +{} @@\n",
        hunk_range(old.len()),
        hunk_range(new.len())
    ));
    for line in diff_lines(&old, &new) {
        out.push_str(&line);
        out.push('\n');
    }
    if expected.ends_with('\n') != actual.ends_with('\n') {
        out.push_str("\\ trailing newline differs\n");
    }
    out
}

/// Split on `\n` only, so a carriage return stays part of its line.
fn split_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    text.strip_suffix('\n').unwrap_or(text).split('\n').collect()
}

/// A diff line with carriage returns made visible.
fn tagged(tag: char, line: &str) -> String {
    format!("{tag}{}", line.replace('\r', "\\r"))
}

fn hunk_range(len: usize) -> String {
    if len == 0 {
        "0,0".to_string()
    } else {
        format!("1,{}", len)
    }
}

fn diff_lines(old: &[&str], new: &[&str]) -> Vec<String> {
    if old.len().saturating_mul(new.len()) > MAX_DIFF_CELLS {
        return old
            .iter()
            .map(|l| tagged('-', l))
            .chain(new.iter().map(|l| tagged('+', l)))
            .collect();
    }

    // lcs[i][j]: longest common subsequence of old[i..] and new[j..].
    let mut lcs = vec![vec![0usize; new.len() + 1]; old.len() + 1];
    for i in (0..old.len()).rev() {
        for j in (0..new.len()).rev() {
            lcs[i][j] = if old[i] == new[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut lines = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < old.len() && j < new.len() {
        if old[i] == new[j] {
            lines.push(tagged(' ', old[i]));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            lines.push(tagged('-', old[i]));
            i += 1;
        } else {
            lines.push(tagged('+', new[j]));
            j += 1;
        }
    }
    lines.extend(old[i..].iter().map(|l| tagged('-', l)));
    lines.extend(new[j..].iter().map(|l| tagged('+', l)));
    lines
}
