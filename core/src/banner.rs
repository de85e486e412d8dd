//! Diagnostic banner construction from captured terminal output.
//!
//! The engine's early output (usage errors, config complaints) is the most
//! useful thing to show a user when a run dies quickly. The raw capture is
//! normalized and then middle-truncated so a notification stays readable:
//! a short lead, an ellipsis, and the final lines when the tail is long
//! enough to matter.

/// Maximum bytes kept for each of the lead and tail segments.
const SEGMENT_MAX_BYTES: usize = 200;
/// The lead is cut at the first line break past this many lines.
const LEAD_MAX_LINES: usize = 10;
/// Tails shorter than this are dropped instead of appended.
const TAIL_MIN_BYTES: usize = 10;

/// Builds the user-facing banner from raw captured output. Returns `None`
/// when nothing readable survives normalization.
pub fn compose(raw: &str) -> Option<String> {
    let normalized = normalize(raw);
    if normalized.is_empty() {
        return None;
    }
    Some(truncate_middle(&normalized))
}

/// Strips leading/trailing whitespace per line and collapses runs of blank
/// lines down to a single one.
fn normalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_blank = false;
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            pending_blank = !out.is_empty();
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
            if pending_blank {
                out.push('\n');
            }
        }
        pending_blank = false;
        out.push_str(line);
    }
    out
}

/// Keeps a lead of at most [`SEGMENT_MAX_BYTES`], cut at the line break
/// ending line [`LEAD_MAX_LINES`]; when the remainder past the cut is
/// longer than [`TAIL_MIN_BYTES`], appends an ellipsis and the final
/// [`SEGMENT_MAX_BYTES`] of the text.
fn truncate_middle(text: &str) -> String {
    let line_cut = nth_line_break(text, LEAD_MAX_LINES).unwrap_or(text.len());
    let start_cutoff = floor_char_boundary(text, line_cut.min(SEGMENT_MAX_BYTES));

    let mut banner = text[..start_cutoff].to_string();

    if text.len() - start_cutoff > TAIL_MIN_BYTES {
        // Anchor the tail at the last line break when one falls past the
        // cut, capped so the tail itself never exceeds the segment limit.
        let anchor = text
            .rfind('\n')
            .filter(|&idx| idx >= start_cutoff)
            .unwrap_or(start_cutoff);
        let tail_start = ceil_char_boundary(
            text,
            anchor.max(text.len().saturating_sub(SEGMENT_MAX_BYTES)),
        );
        banner.push('…');
        banner.push_str(&text[tail_start..]);
    }

    banner
}

/// Byte offset of the `n`-th line break, if the text has that many.
fn nth_line_break(text: &str, n: usize) -> Option<usize> {
    text.match_indices('\n').nth(n.saturating_sub(1)).map(|(idx, _)| idx)
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index
}
