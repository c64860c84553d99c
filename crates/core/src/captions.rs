//! WebVTT normalization.
//!
//! Two views over the same payload: [`clean_text`] flattens it into a single
//! space-joined blob, [`parse_with_offsets`] keeps each text line together
//! with the start second of the cue it belongs to.
//!
//! Both views drop a line that repeats the previously emitted line. YouTube's
//! auto-generated tracks repeat the tail of each cue at the head of the next
//! one, so the rule applies across cue boundaries in both views.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::CaptionLine;

static CUE_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(\d+):)?(\d{2}):(\d{2})\.(\d{3})$").expect("cue start regex is valid")
});

static MARKUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("markup regex is valid"));

/// Lines that open a block which runs until the next blank line.
const BLOCK_KEYWORDS: [&str; 4] = ["WEBVTT", "NOTE", "STYLE", "REGION"];

/// Header keys YouTube emits, sometimes outside the header block.
const METADATA_PREFIXES: [&str; 4] = ["Kind:", "Language:", "Style:", "::cue"];

#[derive(Debug, PartialEq)]
enum Token {
    /// A timing line. `None` when the start time could not be parsed.
    Cue(Option<u64>),
    Text(String),
}

/// Flatten a subtitle payload into plain text.
pub fn clean_text(payload: &str) -> String {
    let mut lines: Vec<String> = Vec::new();

    for token in tokenize(payload) {
        if let Token::Text(text) = token {
            if lines.last() != Some(&text) {
                lines.push(text);
            }
        }
    }

    lines.join(" ")
}

/// Parse a subtitle payload into `(offset, text)` lines in source order.
pub fn parse_with_offsets(payload: &str) -> Vec<CaptionLine> {
    let mut lines: Vec<CaptionLine> = Vec::new();
    let mut current_offset: Option<u64> = None;

    for token in tokenize(payload) {
        match token {
            Token::Cue(Some(offset)) => current_offset = Some(offset),
            Token::Cue(None) => {
                tracing::debug!(?current_offset, "malformed cue timing, keeping previous offset");
            }
            Token::Text(text) => {
                let Some(offset) = current_offset else {
                    continue;
                };
                if lines.last().is_some_and(|last| last.text == text) {
                    continue;
                }
                lines.push(CaptionLine::new(offset, text));
            }
        }
    }

    lines
}

/// Render caption lines in the `offset|text` transcript format.
pub fn format_lines(lines: &[CaptionLine]) -> String {
    lines
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Strip inline markup and decode entities from one line of caption text.
pub fn clean_line(line: &str) -> String {
    let stripped = MARKUP.replace_all(line, "");
    html_escape::decode_html_entities(&stripped).trim().to_string()
}

fn tokenize(payload: &str) -> Vec<Token> {
    let payload = payload.trim_start_matches('\u{feff}');
    let mut tokens = Vec::new();
    let mut in_skipped_block = false;
    let mut lines = payload.lines().map(str::trim).peekable();

    while let Some(line) = lines.next() {
        if line.is_empty() {
            in_skipped_block = false;
            continue;
        }

        if is_timing_line(line) {
            in_skipped_block = false;
            tokens.push(Token::Cue(parse_cue_start(line)));
            continue;
        }

        if in_skipped_block {
            continue;
        }

        if opens_block(line) {
            in_skipped_block = true;
            continue;
        }

        if METADATA_PREFIXES.iter().any(|prefix| line.starts_with(prefix)) {
            continue;
        }

        // cue identifier
        if lines.peek().is_some_and(|next| is_timing_line(next)) {
            continue;
        }

        let text = clean_line(line);
        if !text.is_empty() {
            tokens.push(Token::Text(text));
        }
    }

    tokens
}

fn is_timing_line(line: &str) -> bool {
    line.contains("-->")
}

fn opens_block(line: &str) -> bool {
    BLOCK_KEYWORDS.iter().any(|keyword| {
        line.strip_prefix(keyword)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with([' ', '\t']))
    })
}

/// Whole seconds of the cue start, milliseconds truncated.
fn parse_cue_start(line: &str) -> Option<u64> {
    let (start, _) = line.split_once("-->")?;
    let caps = CUE_START.captures(start.trim())?;

    let hours: u64 = caps.get(1).map_or(Ok(0), |m| m.as_str().parse()).ok()?;
    let minutes: u64 = caps[2].parse().ok()?;
    let seconds: u64 = caps[3].parse().ok()?;

    hours.checked_mul(3600)?.checked_add(minutes * 60 + seconds)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const KARAOKE: &str = "WEBVTT\n\n00:00:01.000 --> 00:00:03.000\nHello there\n\n00:00:03.000 --> 00:00:05.000\nHello there\n";

    fn rendered(payload: &str) -> String {
        format_lines(&parse_with_offsets(payload))
    }

    #[test]
    fn repeated_cue_text_collapses_in_both_views() {
        assert_eq!(clean_text(KARAOKE), "Hello there");
        assert_eq!(rendered(KARAOKE), "1|Hello there");
    }

    #[test]
    fn empty_payload_yields_empty_results() {
        assert_eq!(clean_text(""), "");
        assert!(parse_with_offsets("").is_empty());
        assert!(parse_with_offsets("WEBVTT\n\n").is_empty());
    }

    #[test]
    fn header_block_and_metadata_are_skipped() {
        let payload = "WEBVTT\nKind: captions\nLanguage: en\n\n00:00:00.000 --> 00:00:02.000 align:start position:0%\nfirst line\n";
        assert_eq!(clean_text(payload), "first line");
        assert_eq!(rendered(payload), "0|first line");
    }

    #[test]
    fn offsets_follow_their_cue_and_truncate_millis() {
        let payload = "WEBVTT\n\n\
            00:00:01.999 --> 00:00:03.000\none\ntwo\n\n\
            00:01:05.500 --> 00:01:07.000\nthree\n\n\
            01:00:00.000 --> 01:00:02.000\nfour\n";

        assert_eq!(rendered(payload), "1|one\n1|two\n65|three\n3600|four");
    }

    #[test]
    fn out_of_order_cues_keep_source_order() {
        let payload = "WEBVTT\n\n00:00:10.000 --> 00:00:11.000\nlater\n\n00:00:02.000 --> 00:00:03.000\nearlier\n";
        assert_eq!(rendered(payload), "10|later\n2|earlier");
    }

    #[test]
    fn text_before_first_cue_is_dropped() {
        let payload = "stray text\n\n00:00:04.000 --> 00:00:05.000\nkept\n";
        assert_eq!(rendered(payload), "4|kept");
        assert_eq!(clean_text(payload), "stray text kept");
    }

    #[test]
    fn malformed_timing_keeps_previous_offset() {
        let payload = "WEBVTT\n\n00:00:07.000 --> 00:00:08.000\nfirst\n\n00:xx:09.000 --> 00:00:10.000\nsecond\n";
        assert_eq!(rendered(payload), "7|first\n7|second");
    }

    #[test]
    fn absurd_hour_value_keeps_previous_offset() {
        let payload = "WEBVTT\n\n00:00:07.000 --> 00:00:08.000\nfirst\n\n9999999999999999:00:00.000 --> 9999999999999999:00:01.000\nsecond\n";
        assert_eq!(rendered(payload), "7|first\n7|second");

        let past_u64 = "WEBVTT\n\n00:00:07.000 --> 00:00:08.000\nfirst\n\n99999999999999999999:00:00.000 --> 00:00:09.000\nsecond\n";
        assert_eq!(rendered(past_u64), "7|first\n7|second");
    }

    #[test]
    fn malformed_first_cue_drops_its_text() {
        let payload = "WEBVTT\n\nbroken --> 00:00:10.000\norphan\n\n00:00:12.000 --> 00:00:13.000\nok\n";
        assert_eq!(rendered(payload), "12|ok");
    }

    #[test]
    fn markup_and_entities_are_cleaned() {
        let payload = "WEBVTT\n\n00:00:00.000 --> 00:00:02.000\nit<00:00:00.480><c> isn&#39;t</c> <b>fish</b> &amp; chips\n";
        assert_eq!(clean_text(payload), "it isn't fish & chips");
        assert_eq!(rendered(payload), "0|it isn't fish & chips");
    }

    #[test]
    fn lines_that_are_only_markup_disappear() {
        let payload = "WEBVTT\n\n00:00:00.000 --> 00:00:02.000\n<c></c>\nwords\n";
        assert_eq!(rendered(payload), "0|words");
    }

    #[test]
    fn note_and_style_blocks_are_skipped() {
        let payload = "WEBVTT\n\nSTYLE\n::cue { color: white; }\n\nNOTE this is a comment\nspanning lines\n\n00:00:03.000 --> 00:00:04.000\nvisible\n";
        assert_eq!(clean_text(payload), "visible");
        assert_eq!(rendered(payload), "3|visible");
    }

    #[test]
    fn cue_identifiers_are_not_text() {
        let payload = "WEBVTT\n\n1\n00:00:01.000 --> 00:00:02.000\nalpha\n\nintro\n00:00:02.000 --> 00:00:03.000\nbeta\n";
        assert_eq!(rendered(payload), "1|alpha\n2|beta");
    }

    #[test]
    fn timestamps_without_hours_are_accepted() {
        let payload = "WEBVTT\n\n01:02.345 --> 01:04.000\nshort form\n";
        assert_eq!(rendered(payload), "62|short form");
    }

    #[test]
    fn non_adjacent_repeats_are_kept() {
        let payload = "WEBVTT\n\n00:00:01.000 --> 00:00:02.000\nyes\n\n00:00:02.000 --> 00:00:03.000\nno\n\n00:00:03.000 --> 00:00:04.000\nyes\n";
        assert_eq!(clean_text(payload), "yes no yes");
        assert_eq!(rendered(payload), "1|yes\n2|no\n3|yes");
    }

    #[test]
    fn clean_text_is_idempotent() {
        let payload = "WEBVTT\n\n00:00:01.000 --> 00:00:02.000\nwe are\nwe are\n\n00:00:02.000 --> 00:00:03.000\nwe are\nback &amp; ready\n";
        let once = clean_text(payload);
        assert_eq!(once, "we are back & ready");
        assert_eq!(clean_text(&once), once);
    }

    #[test]
    fn byte_order_mark_does_not_hide_header() {
        let payload = "\u{feff}WEBVTT\n\n00:00:05.000 --> 00:00:06.000\nbom\n";
        assert_eq!(rendered(payload), "5|bom");
    }
}
