//! Line diffs of post bodies for detailed change messages.
//!
//! Only removed and added lines are kept, marked `🔴` and `🟢`. Long diffs are
//! split into chunks that respect grapheme boundaries so an emoji or a Hangul
//! syllable is never cut in half.

use unicode_segmentation::UnicodeSegmentation;

const REMOVED: &str = "🔴";
const ADDED: &str = "🟢";

/// Above this many line pairs the LCS table is skipped.
const MAX_LCS_CELLS: usize = 4_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edit<'a> {
    Keep,
    Remove(&'a str),
    Add(&'a str),
}

/// Render the changed lines between two bodies.
///
/// Returns an empty string when either side is empty or nothing differs.
pub fn clean_diff(old: &str, new: &str) -> String {
    if old.trim().is_empty() || new.trim().is_empty() {
        return String::new();
    }

    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();

    line_edits(&old_lines, &new_lines)
        .into_iter()
        .filter_map(|edit| match edit {
            Edit::Keep => None,
            Edit::Remove(line) => marked(REMOVED, line),
            Edit::Add(line) => marked(ADDED, line),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn marked(marker: &str, line: &str) -> Option<String> {
    let line = line.trim();
    (!line.is_empty()).then(|| format!("{marker} {line}"))
}

/// Longest-common-subsequence edit script, removals before additions.
fn line_edits<'a>(old: &[&'a str], new: &[&'a str]) -> Vec<Edit<'a>> {
    let (n, m) = (old.len(), new.len());
    if n.saturating_mul(m) > MAX_LCS_CELLS {
        let mut edits: Vec<Edit<'a>> = old.iter().map(|l| Edit::Remove(l)).collect();
        edits.extend(new.iter().map(|l| Edit::Add(l)));
        return edits;
    }

    // lcs[i][j] = LCS length of old[i..] and new[j..]
    let mut lcs = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if old[i] == new[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut edits = Vec::with_capacity(n + m);
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            edits.push(Edit::Keep);
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            edits.push(Edit::Remove(old[i]));
            i += 1;
        } else {
            edits.push(Edit::Add(new[j]));
            j += 1;
        }
    }
    edits.extend(old[i..].iter().map(|l| Edit::Remove(l)));
    edits.extend(new[j..].iter().map(|l| Edit::Add(l)));
    edits
}

/// Split text into chunks of at most `max_chars` characters.
///
/// Lines are kept whole when they fit; longer lines are cut on grapheme
/// boundaries.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.lines() {
        let line_len = line.chars().count();
        let needed = if current.is_empty() {
            line_len
        } else {
            line_len + 1
        };

        if current_len + needed <= max_chars {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
            current_len += needed;
            continue;
        }

        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if line_len <= max_chars {
            current.push_str(line);
            current_len = line_len;
            continue;
        }

        for grapheme in line.graphemes(true) {
            let len = grapheme.chars().count();
            if current_len + len > max_chars && !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            current.push_str(grapheme);
            current_len += len;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Truncate to `max_chars` characters on a grapheme boundary, appending `...`.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let budget = max_chars.saturating_sub(3);
    let mut out = String::new();
    let mut used = 0;
    for grapheme in text.graphemes(true) {
        let len = grapheme.chars().count();
        if used + len > budget {
            break;
        }
        out.push_str(grapheme);
        used += len;
    }
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_diff_marks_changed_lines_only() {
        let old = "제목: 장학금 안내\n기간: 3월 1일\n문의: 학생처";
        let new = "제목: 장학금 안내\n기간: 3월 8일\n문의: 학생처";
        assert_eq!(clean_diff(old, new), "🔴 기간: 3월 1일\n🟢 기간: 3월 8일");
    }

    #[test]
    fn test_clean_diff_additions_and_removals() {
        let old = "a\nb\nc";
        let new = "a\nc\nd";
        assert_eq!(clean_diff(old, new), "🔴 b\n🟢 d");
    }

    #[test]
    fn test_clean_diff_empty_side() {
        assert_eq!(clean_diff("", "new"), "");
        assert_eq!(clean_diff("old", "  "), "");
        assert_eq!(clean_diff("same", "same"), "");
    }

    #[test]
    fn test_clean_diff_skips_blank_lines() {
        let diff = clean_diff("a\n\nb", "a\nb\n\n\nc");
        assert_eq!(diff, "🟢 c");
    }

    #[test]
    fn test_chunk_text_keeps_lines_together() {
        let text = "aaaa\nbbbb\ncccc";
        assert_eq!(chunk_text(text, 9), vec!["aaaa\nbbbb", "cccc"]);
        assert_eq!(chunk_text(text, 100), vec![text]);
    }

    #[test]
    fn test_chunk_text_splits_long_lines_on_graphemes() {
        let line = "가".repeat(25);
        let chunks = chunk_text(&line, 10);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks.concat(), line);
    }

    #[test]
    fn test_chunk_text_never_splits_a_grapheme() {
        // flag emoji: two code points, one grapheme
        let line = "🇰🇷".repeat(5);
        let chunks = chunk_text(&line, 3);
        assert!(chunks.iter().all(|c| c.chars().count() % 2 == 0));
        assert_eq!(chunks.concat(), line);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijk", 8), "abcde...");
        assert_eq!(truncate(&"가".repeat(200), 100).chars().count(), 100);
    }
}
