//! The fallback-strategy text matcher behind minimal-diff file edits.
//!
//! Six strategies are tried in a fixed order and the first one that yields
//! at least one match wins outright. Strategies never merge results and
//! there is no scoring: either a strategy locates the snippet or the next
//! one gets a chance. When nothing matches, or when a single-replacement
//! edit is ambiguous, the caller gets a descriptive error instead of a
//! guess.

use thiserror::Error;

/// Number of strategies tried before giving up.
pub const STRATEGY_COUNT: usize = 6;

/// A located occurrence of the target snippet within the content.
///
/// Offsets are byte positions into the original content; `text` is the
/// exact (untrimmed) span they cover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    #[error("no match found after trying {STRATEGY_COUNT} matching strategies")]
    NoMatch,

    #[error("found {0} matching occurrences; provide more context to make the match unique, or set replace_all")]
    Ambiguous(usize),
}

/// The outcome of a successful search: every occurrence the winning
/// strategy found, plus that strategy's name for reporting.
#[derive(Debug, Clone)]
pub struct Found {
    pub matches: Vec<Match>,
    pub strategy: &'static str,
}

/// Locate `target` within `content`.
///
/// With `replace_all` set, all non-overlapping occurrences are returned in
/// left-to-right order. Without it, exactly one occurrence must exist:
/// more than one is an [`MatchError::Ambiguous`] error, never a silent
/// pick.
pub fn find_matches(content: &str, target: &str, replace_all: bool) -> Result<Found, MatchError> {
    if target.is_empty() {
        return Err(MatchError::NoMatch);
    }

    let strategies: [(&'static str, fn(&str, &str) -> Vec<Match>); STRATEGY_COUNT] = [
        ("exact", exact_matches),
        ("line-trimmed", line_trimmed_matches),
        ("whitespace-normalized", whitespace_normalized_matches),
        ("indentation-flexible", indentation_flexible_matches),
        ("block-anchor", block_anchor_matches),
        ("fuzzy-line", fuzzy_line_matches),
    ];

    for (name, strategy) in strategies {
        let matches = strategy(content, target);
        if matches.is_empty() {
            continue;
        }
        if !replace_all && matches.len() > 1 {
            return Err(MatchError::Ambiguous(matches.len()));
        }
        return Ok(Found {
            matches,
            strategy: name,
        });
    }

    Err(MatchError::NoMatch)
}

/// Substitute every match with `replacement`, working from the last match
/// backwards so earlier offsets stay valid.
pub fn apply_replacement(content: &str, matches: &[Match], replacement: &str) -> String {
    let mut result = content.to_string();
    for m in matches.iter().rev() {
        result.replace_range(m.start..m.end, replacement);
    }
    result
}

/// Strategy 1: literal substring search.
fn exact_matches(content: &str, target: &str) -> Vec<Match> {
    if target.is_empty() {
        return Vec::new();
    }
    content
        .match_indices(target)
        .map(|(start, text)| Match {
            start,
            end: start + text.len(),
            text: text.to_string(),
        })
        .collect()
}

/// Byte offset of the start of each line, split on `\n`.
fn line_starts(lines: &[&str]) -> Vec<usize> {
    let mut starts = Vec::with_capacity(lines.len());
    let mut offset = 0;
    for line in lines {
        starts.push(offset);
        offset += line.len() + 1;
    }
    starts
}

/// The span covering lines `[first, first + count)`, newlines included
/// between lines but not after the last one.
fn line_span(content: &str, lines: &[&str], starts: &[usize], first: usize, count: usize) -> Match {
    let start = starts[first];
    let mut end = start;
    for k in 0..count {
        end += lines[first + k].len();
        if k < count - 1 {
            end += 1;
        }
    }
    Match {
        start,
        end,
        text: content[start..end].to_string(),
    }
}

/// Find contiguous runs of content lines where `line_eq` holds against the
/// target's lines, in order. Shared by the three line-oriented strategies.
fn line_run_matches(
    content: &str,
    target: &str,
    line_eq: impl Fn(&str, &str) -> bool,
) -> Vec<Match> {
    let target_lines: Vec<&str> = target.split('\n').collect();
    let content_lines: Vec<&str> = content.split('\n').collect();
    if target_lines.len() > content_lines.len() {
        return Vec::new();
    }
    let starts = line_starts(&content_lines);

    let mut matches = Vec::new();
    let mut i = 0;
    while i + target_lines.len() <= content_lines.len() {
        let hit = target_lines
            .iter()
            .enumerate()
            .all(|(j, t)| line_eq(content_lines[i + j], t));
        if hit {
            matches.push(line_span(
                content,
                &content_lines,
                &starts,
                i,
                target_lines.len(),
            ));
            i += target_lines.len();
        } else {
            i += 1;
        }
    }
    matches
}

/// Strategy 2: compare line by line after trimming leading and trailing
/// whitespace from each side.
fn line_trimmed_matches(content: &str, target: &str) -> Vec<Match> {
    line_run_matches(content, target, |c, t| c.trim() == t.trim())
}

/// Strategy 3: collapse the target to a word sequence and scan the
/// content word by word, skipping whitespace freely between words.
/// A match is anchored at each occurrence of the first word.
fn whitespace_normalized_matches(content: &str, target: &str) -> Vec<Match> {
    let words: Vec<&str> = target.split_whitespace().collect();
    let Some(first_word) = words.first() else {
        return Vec::new();
    };

    let mut matches = Vec::new();
    let mut search_from = 0;
    while let Some(rel) = content[search_from..].find(first_word) {
        let start = search_from + rel;
        match match_words_at(content, start, &words) {
            Some(end) => {
                matches.push(Match {
                    start,
                    end,
                    text: content[start..end].to_string(),
                });
                search_from = end;
            }
            None => {
                // step over one char so the next scan can't refind this spot
                let step = content[start..].chars().next().map_or(1, char::len_utf8);
                search_from = start + step;
            }
        }
    }
    matches
}

/// Try to match `words` starting at byte `start`, whitespace between
/// words absorbed. Returns the end offset on success.
fn match_words_at(content: &str, start: usize, words: &[&str]) -> Option<usize> {
    let mut pos = start;
    for (i, word) in words.iter().enumerate() {
        if i > 0 {
            while let Some(c) = content[pos..].chars().next() {
                if c.is_whitespace() {
                    pos += c.len_utf8();
                } else {
                    break;
                }
            }
        }
        if content[pos..].starts_with(word) {
            pos += word.len();
        } else {
            return None;
        }
    }
    Some(pos)
}

/// Strategy 4: like line-trimmed, but only leading whitespace is ignored,
/// so trailing and internal spacing must still agree.
fn indentation_flexible_matches(content: &str, target: &str) -> Vec<Match> {
    line_run_matches(content, target, |c, t| {
        c.trim_start_matches([' ', '\t']) == t.trim_start_matches([' ', '\t'])
    })
}

/// Strategy 5: for targets of two or more lines, match just the trimmed
/// first and last lines against content lines the right distance apart;
/// everything between the anchors is accepted as-is.
fn block_anchor_matches(content: &str, target: &str) -> Vec<Match> {
    let target_lines: Vec<&str> = target.split('\n').collect();
    if target_lines.len() < 2 {
        return Vec::new();
    }
    let first_anchor = target_lines[0].trim();
    let last_anchor = target_lines[target_lines.len() - 1].trim();
    if first_anchor.is_empty() || last_anchor.is_empty() {
        return Vec::new();
    }

    let content_lines: Vec<&str> = content.split('\n').collect();
    let starts = line_starts(&content_lines);

    let mut matches = Vec::new();
    let mut i = 0;
    while i < content_lines.len() {
        if content_lines[i].trim() != first_anchor {
            i += 1;
            continue;
        }
        let expected_end = i + target_lines.len() - 1;
        if expected_end >= content_lines.len()
            || content_lines[expected_end].trim() != last_anchor
        {
            i += 1;
            continue;
        }
        matches.push(line_span(
            content,
            &content_lines,
            &starts,
            i,
            target_lines.len(),
        ));
        i = expected_end + 1;
    }
    matches
}

/// Strategy 6: build a single pattern from the target's trimmed lines,
/// each allowed arbitrary leading whitespace, and evaluate it against the
/// whole content.
fn fuzzy_line_matches(content: &str, target: &str) -> Vec<Match> {
    let pattern = target
        .split('\n')
        .map(|line| format!(r"[ \t]*{}", regex::escape(line.trim())))
        .collect::<Vec<_>>()
        .join("\n");

    let Ok(re) = regex::Regex::new(&pattern) else {
        return Vec::new();
    };

    re.find_iter(content)
        .filter(|m| !m.as_str().trim().is_empty())
        .map(|m| Match {
            start: m.start(),
            end: m.end(),
            text: m.as_str().to_string(),
        })
        .collect()
}
