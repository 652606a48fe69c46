//! Ordered rule table for submitter-name extraction.

use regex::Regex;
use tracing::{debug, info, warn};

use super::patterns::*;

/// Returned when no rule yields an acceptable name.
pub const UNKNOWN_BANK_DEFAULT: &str = "UNKNOWN_BANK_DEFAULT";

/// One extraction rule: where to look, which group holds the name, and when
/// to accept it.
struct NameRule {
    label: &'static str,
    pattern: &'static Regex,
    group: usize,
    accept: fn(&str) -> bool,
}

impl NameRule {
    /// First line of the named group in the rule's first match only.
    fn candidate(&self, window: &str) -> Option<String> {
        let caps = self.pattern.captures(window)?;
        let raw = caps.get(self.group)?.as_str();
        Some(raw.lines().next().unwrap_or("").trim().to_string())
    }
}

/// Rules in priority order.
fn rules() -> [NameRule; 7] {
    [
        NameRule { label: "mixed-case bank", pattern: &*MIXED_CASE_BANK, group: 1, accept: plausible_name },
        NameRule { label: "upper-case bank line", pattern: &*UPPER_BANK_LINE, group: 1, accept: plausible_name },
        NameRule { label: "company suffix", pattern: &*COMPANY_SUFFIX_LINE, group: 1, accept: plausible_name },
        NameRule { label: "legal institution name", pattern: &*LEGAL_BANK_LINE, group: 1, accept: plausible_name },
        NameRule { label: "account name label", pattern: &*ACCOUNT_NAME_LABEL, group: 1, accept: plausible_name },
        NameRule { label: "bank with address", pattern: &*BANK_WITH_ADDRESS, group: 1, accept: plausible_name },
        NameRule { label: "word before bank", pattern: &*WORD_BANK, group: 1, accept: plausible_name },
    ]
}

/// Rejects fragments and headings that are not names.
fn plausible_name(candidate: &str) -> bool {
    let upper = candidate.to_uppercase();
    candidate.chars().count() > 3 && !upper.contains("STATEMENT") && !upper.contains("BOX")
}

/// Leading `max_chars` characters of `text`.
fn leading_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Best-effort bank or company name from the start of a document.
///
/// Falls back to [`UNKNOWN_BANK_DEFAULT`] when nothing acceptable is found.
pub fn extract_submitter_name(text: &str, max_chars: usize) -> String {
    let window = leading_chars(text, max_chars);

    for rule in rules() {
        let Some(candidate) = rule.candidate(window) else {
            continue;
        };
        if (rule.accept)(&candidate) {
            info!("Extracted submitter name via {}: {}", rule.label, candidate);
            return candidate;
        }
        debug!("Rejected {} candidate: {:?}", rule.label, candidate);
    }

    warn!("No submitter name found, using fallback");
    UNKNOWN_BANK_DEFAULT.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_keybank_above_address() {
        let text = "Account Statement\nKeyBank\n123 Main Street\nCleveland, OH 44114\n";
        let name = extract_submitter_name(text, 1000);
        assert!(name.contains("KeyBank"), "got {}", name);
    }

    #[test]
    fn test_no_match_gives_sentinel() {
        let text = "page 1 of 3\nopening 12.00\nclosing 14.00\n";
        assert_eq!(extract_submitter_name(text, 1000), UNKNOWN_BANK_DEFAULT);
    }

    #[test]
    fn test_rejects_statement_headings() {
        // "Statement Bank" is a heading; the next rule finds the real entity.
        let text = "Statement Bank\nACME HOLDINGS LLC\n";
        assert_eq!(extract_submitter_name(text, 1000), "ACME HOLDINGS LLC");
    }

    #[test]
    fn test_only_first_match_of_each_rule_is_tried() {
        // The rejected heading ends the mixed-case rule; a later rule decides.
        let text = "Statement Bank\nFirst Citizens Bank\nACME HOLDINGS LLC\n";
        assert_eq!(extract_submitter_name(text, 1000), "ACME HOLDINGS LLC");
    }

    #[test]
    fn test_word_before_bank_keeps_only_the_word() {
        let text = "paid via zeta bank transfer\n";
        assert_eq!(extract_submitter_name(text, 1000), "zeta");
    }

    #[test]
    fn test_rejects_po_box() {
        let text = "PO BOX BANK\n";
        assert_eq!(extract_submitter_name(text, 1000), UNKNOWN_BANK_DEFAULT);
    }

    #[test]
    fn test_plausible_name() {
        assert!(!plausible_name("ABC"));
        assert!(plausible_name("ABCD"));
        assert!(!plausible_name("Monthly statement"));
        assert!(!plausible_name("P.O. Box 12"));
    }

    #[test]
    fn test_company_suffix() {
        let text = "Page 1\nROBERT WEED PLYWOOD CORP\n1 Mill Road\n";
        assert_eq!(extract_submitter_name(text, 1000), "ROBERT WEED PLYWOOD CORP");
    }

    #[test]
    fn test_account_name_label() {
        let text = "Summary\nAccount name: Green Leaf Traders\nSort code 00-00-00\n";
        assert_eq!(extract_submitter_name(text, 1000), "Green Leaf Traders");
    }

    #[test]
    fn test_search_window_is_bounded() {
        let text = format!("{}\nKeyBank\n", "x".repeat(2000));
        assert_eq!(extract_submitter_name(&text, 1000), UNKNOWN_BANK_DEFAULT);
    }

    #[test]
    fn test_window_respects_char_boundaries() {
        let text = "żółw ".repeat(300);
        assert_eq!(leading_chars(&text, 7), "żółw żó");
    }
}
