//! Output normalization: turn a raw captured log body into clean logical
//! text.
//!
//! The raw body can take three shapes: streamed JSON objects one per line
//! (each carrying a partial `response` field) interleaved with progress
//! noise, unstructured text with embedded terminal artifacts, or plain text.
//! `normalize` degrades gracefully across all three and never fails; the
//! worst case is the input with terminal artifacts stripped.

use once_cell::sync::Lazy;
use regex::Regex;

/// Delimiters separating the header (metadata + echoed input) from the body.
const RESPONSE_MARKER: &str = "RESPONSE:";
const OUTPUT_MARKER: &str = "OUTPUT:";

/// Turn delimiter emitted by some agent frontends.
const ASSISTANT_MARKER: &str = "[ASSISTANT]";

/// Substrings marking model-download progress lines, matched case-insensitively.
const NOISE_MARKERS: &[&str] = &["pulling", "verifying", "writing manifest", "success"];

/// Box-drawing characters used by terminal UI frames.
const BOX_PREFIXES: &[char] = &['╭', '│', '╰'];

/// Header echo lines that occasionally leak into the body.
const ECHO_PREFIXES: &[&str] = &["METADATA:", "PROMPT:", "COMMAND:"];

static ANSI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").unwrap());
static CURSOR_VISIBILITY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1B\[\?25[hl]").unwrap());
static SYNC_UPDATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1B\[\?2026[hl]").unwrap());
static CURSOR_COLUMN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1B\[\d*G").unwrap());
static LINE_CLEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1B\[\d*K").unwrap());
static MULTI_NEWLINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());
static BLANK_LINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]+\n").unwrap());
static TOKEN_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z]\d+").unwrap());
static BRACKET_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[^\]]*\]").unwrap());

// the exit seal is registry bookkeeping, not job output
static EXIT_MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"\n*{}-?\d+\]",
        regex::escape(crate::logfile::EXIT_MARKER_PREFIX)
    ))
    .unwrap()
});

/// Braille patterns, the block spinner animations draw from.
fn is_spinner_glyph(c: char) -> bool {
    ('\u{2800}'..='\u{28FF}').contains(&c)
}

/// Strip terminal artifacts: ANSI escapes, cursor control, spinner glyphs,
/// stray carriage returns, and runaway blank lines.
pub fn clean_ansi(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let mut cleaned = ANSI_RE.replace_all(text, "").into_owned();
    for re in [
        &*CURSOR_VISIBILITY_RE,
        &*SYNC_UPDATE_RE,
        &*CURSOR_COLUMN_RE,
        &*LINE_CLEAR_RE,
    ] {
        cleaned = re.replace_all(&cleaned, "").into_owned();
    }
    // same-line redraw artifacts become line breaks
    cleaned = cleaned.replace("\r\n", "\n").replace('\r', "\n");
    cleaned.retain(|c| !is_spinner_glyph(c));
    cleaned = MULTI_NEWLINE_RE.replace_all(&cleaned, "\n\n").into_owned();
    cleaned = BLANK_LINE_RE.replace_all(&cleaned, "\n\n").into_owned();
    cleaned.trim().to_string()
}

fn is_noise(line: &str) -> bool {
    let lower = line.to_lowercase();
    if NOISE_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return true;
    }
    if line.starts_with(BOX_PREFIXES) {
        return true;
    }
    if line.chars().any(is_spinner_glyph) {
        return true;
    }
    ECHO_PREFIXES.iter().any(|prefix| line.starts_with(prefix))
}

/// Walk the body line by line, accumulating `response` fragments from
/// streamed JSON objects and passing plausible literal content through.
/// Returns the accumulator and whether any JSON fragment was seen.
fn reconstruct_stream(body: &str) -> (String, bool) {
    let mut acc = String::new();
    let mut saw_json = false;
    for raw in body.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(line) {
            if value.is_object() {
                if let Some(fragment) = value.get("response").and_then(|v| v.as_str()) {
                    acc.push_str(fragment);
                    saw_json = true;
                }
                // objects without a response field are progress records
                continue;
            }
        }
        if is_noise(line) || TOKEN_ID_RE.is_match(line) {
            continue;
        }
        acc.push_str(line);
        acc.push('\n');
    }
    (acc, saw_json)
}

/// Normalize a raw log file's content. Total and deterministic: if the body
/// yields no structured content, the text after an `[ASSISTANT]` marker is
/// used, and failing that the lightly-cleaned body itself.
pub fn normalize(content: &str) -> String {
    if content.is_empty() {
        return String::new();
    }
    let content = EXIT_MARKER_RE.replace_all(content, "");
    let content = content.as_ref();
    let marker = [RESPONSE_MARKER, OUTPUT_MARKER]
        .iter()
        .filter_map(|m| content.find(m).map(|idx| (idx, *m)))
        .min_by_key(|(idx, _)| *idx);
    let (idx, marker) = match marker {
        Some(found) => found,
        None => return clean_ansi(content),
    };
    let split = idx + marker.len();
    let header = format!("{}\n", &content[..split]);
    let body = &content[split..];

    let (reconstructed, saw_json) = reconstruct_stream(body);
    if saw_json && !reconstructed.trim().is_empty() {
        return header + &clean_ansi(&reconstructed);
    }

    if let Some(pos) = body.find(ASSISTANT_MARKER) {
        let after = &body[pos + ASSISTANT_MARKER.len()..];
        let stripped = BRACKET_RE.replace_all(after, "");
        return header + &clean_ansi(&stripped);
    }

    header + &clean_ansi(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "METADATA: {\"job_id\": \"a\", \"timestamp\": 1.0}\n\nPROMPT: capital of France?\n\nRESPONSE:\n";

    #[test]
    fn strips_csi_sequences() {
        assert_eq!(normalize("\x1b[31mHello\x1b[0m"), "Hello");
    }

    #[test]
    fn strips_cursor_and_line_control() {
        let raw = "\x1b[?25lworking\x1b[?25h\x1b[2K\x1b[1G done";
        assert_eq!(clean_ansi(raw), "working done");
    }

    #[test]
    fn carriage_returns_become_newlines() {
        assert_eq!(clean_ansi("10%\r20%\r30%"), "10%\n20%\n30%");
    }

    #[test]
    fn strips_spinner_glyphs() {
        assert_eq!(clean_ansi("⠙⠹ loading ⠼"), "loading");
    }

    #[test]
    fn collapses_newline_runs() {
        assert_eq!(clean_ansi("a\n\n\n\n\nb"), "a\n\nb");
    }

    #[test]
    fn reconstructs_streamed_json_and_drops_noise() {
        let raw = format!(
            "{}pulling manifest\n{{\"response\":\"Hel\"}}\n{{\"response\":\"lo \"}}\n{{\"response\":\"World\"}}\n",
            HEADER
        );
        let cleaned = normalize(&raw);
        assert!(cleaned.starts_with("METADATA:"));
        assert!(cleaned.ends_with("RESPONSE:\nHello World"));
        assert!(!cleaned.contains("pulling"));
    }

    #[test]
    fn json_objects_without_response_field_are_dropped() {
        let raw = format!(
            "{}{{\"status\":\"downloading\"}}\n{{\"response\":\"Paris\"}}\n",
            HEADER
        );
        assert!(normalize(&raw).ends_with("RESPONSE:\nParis"));
    }

    #[test]
    fn json_fragment_containing_noise_word_survives() {
        let raw = format!("{}{{\"response\":\"a great success\"}}\n", HEADER);
        assert!(normalize(&raw).ends_with("a great success"));
    }

    #[test]
    fn plain_text_with_noise_word_is_not_stripped() {
        let raw = format!("{}build finished with success\n", HEADER);
        assert!(normalize(&raw).ends_with("build finished with success"));
    }

    #[test]
    fn assistant_marker_fallback_strips_annotations() {
        let raw = format!(
            "{}╭──────╮\n│ chat │\n[USER] hi\n[ASSISTANT]\nThe capital is [cited] Paris.\n",
            HEADER
        );
        let cleaned = normalize(&raw);
        assert!(cleaned.ends_with("The capital is  Paris."));
        assert!(!cleaned.contains("[USER]"));
    }

    #[test]
    fn no_marker_returns_cleaned_input() {
        assert_eq!(normalize("plain \x1b[1mtext\x1b[0m"), "plain text");
    }

    #[test]
    fn empty_body_keeps_header() {
        let cleaned = normalize(HEADER);
        assert!(cleaned.starts_with("METADATA:"));
        assert!(cleaned.ends_with("RESPONSE:\n"));
    }

    #[test]
    fn idempotent_on_clean_text() {
        let samples = [
            format!("{}Paris is the capital of France.", HEADER),
            "no marker at all, just text".to_string(),
            format!("{}line one\nline two", HEADER),
        ];
        for sample in samples {
            let once = normalize(&sample);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn exit_marker_lines_are_stripped() {
        let raw = "METADATA: {}\n\nCOMMAND: false\n\nOUTPUT:\nboom\n\n[JOB EXITED WITH CODE 3]\n";
        let cleaned = normalize(raw);
        assert!(cleaned.ends_with("OUTPUT:\nboom"));
        assert!(!cleaned.contains("EXITED"));
    }

    #[test]
    fn output_marker_bodies_are_cleaned_too() {
        let raw = "METADATA: {}\n\nCOMMAND: echo hi\n\nOUTPUT:\nhi\x1b[0m\n";
        let cleaned = normalize(raw);
        assert!(cleaned.ends_with("OUTPUT:\nhi"));
    }
}
