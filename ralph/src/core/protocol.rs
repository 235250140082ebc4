//! In-band control tags parsed out of free-form agent output.
//!
//! The agent talks back to the loop through two tags:
//!
//! - `<ralph_notes>...</ralph_notes>`: free text carried into the notes journal.
//! - `<ralph_status>COMPLETE</ralph_status>`: asks the loop to stop.
//!
//! Both helpers are pure and never fail; malformed tags simply yield nothing.

use std::sync::LazyLock;

use regex::Regex;

static NOTES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<ralph_notes>(.*?)</ralph_notes>").expect("notes pattern should be valid")
});

static COMPLETE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?si)<ralph_status>\s*COMPLETE\s*</ralph_status>")
        .expect("status pattern should be valid")
});

/// Result of scanning one agent response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolOutput {
    /// Trimmed body of the first notes block, if any.
    pub notes: Option<String>,
    /// Whether the agent reported completion.
    pub complete: bool,
}

impl ProtocolOutput {
    pub fn parse(output: &str) -> Self {
        let notes = extract_notes(output);
        Self {
            notes: (!notes.is_empty()).then_some(notes),
            complete: is_complete(output),
        }
    }
}

/// Return the trimmed inner text of the first complete `<ralph_notes>` block.
///
/// An absent or unterminated block yields an empty string.
pub fn extract_notes(output: &str) -> String {
    NOTES_RE
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

/// True when a `<ralph_status>` tag holds exactly `COMPLETE` (any case, any padding).
pub fn is_complete(output: &str) -> bool {
    COMPLETE_RE.is_match(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_notes_cases() {
        let cases = [
            ("missing", "no notes", ""),
            ("present", "<ralph_notes>\nhello\n</ralph_notes>", "hello"),
            ("unterminated", "<ralph_notes>oops", ""),
            ("closing only", "oops</ralph_notes>", ""),
        ];
        for (name, input, want) in cases {
            assert_eq!(extract_notes(input), want, "case {name}");
        }
    }

    #[test]
    fn extract_notes_takes_first_block_and_keeps_inner_newlines() {
        let output = "chatter\n<ralph_notes>\n  line one\n  line two\n</ralph_notes>\n\
                      <ralph_notes>second</ralph_notes>";
        assert_eq!(extract_notes(output), "line one\n  line two");
    }

    #[test]
    fn complete_detection() {
        assert!(is_complete("<ralph_status>COMPLETE</ralph_status>"));
        assert!(is_complete("done\n<ralph_status>\n  complete \n</ralph_status>\n"));
        assert!(!is_complete("<ralph_status>INCOMPLETE</ralph_status>"));
        assert!(!is_complete("<ralph_status>COMPLETE soon</ralph_status>"));
        assert!(!is_complete("COMPLETE"));
    }

    #[test]
    fn parse_drops_empty_notes() {
        let parsed = ProtocolOutput::parse("<ralph_notes>   </ralph_notes>");
        assert_eq!(parsed, ProtocolOutput::default());

        let parsed = ProtocolOutput::parse(
            "<ralph_notes>did a thing</ralph_notes><ralph_status>COMPLETE</ralph_status>",
        );
        assert_eq!(parsed.notes.as_deref(), Some("did a thing"));
        assert!(parsed.complete);
    }
}
