//! Regex patterns for statement classification and submitter names.

use lazy_static::lazy_static;
use regex::Regex;

/// Phrases typical of bank statements, matched against lower-cased text.
pub const STATEMENT_KEYWORDS: &[&str] = &[
    "monthly statement",
    "account summary",
    "activity report",
    "statement period",
    "deposits and withdrawals",
    "balance forward",
    "checking account",
    "savings account",
    "bank statement",
    "checking",
    "beginning balance",
    "ending balance",
    "account history",
];

/// Filename tokens that mark a statement on their own.
pub const STRONG_FILENAME_KEYWORDS: &[&str] = &["statement", "bank", "account_summary"];

/// Extensions eligible for the filename fallback.
pub const FILENAME_EXTENSIONS: &[&str] = &[".pdf", ".doc", ".docx", ".csv"];

lazy_static! {
    pub static ref FILENAME_TOKENS: Regex = Regex::new(r"(?i)(bank|statement|account)").unwrap();

    // a. Mixed-case name directly before Bank/Trust on one line (KeyBank, First Citizens Bank)
    pub static ref MIXED_CASE_BANK: Regex = Regex::new(
        r"\b([A-Z][a-zA-Z&'.]*(?:[ \t]+[A-Z][a-zA-Z&'.]*)*[ \t]*(?:Bank|BANK|Trust|TRUST))\b"
    ).unwrap();

    // b. All-caps line ending in BANK/TRUST
    pub static ref UPPER_BANK_LINE: Regex = Regex::new(
        r"(?m)^[ \t]*([A-Z][A-Z ,.\-]*(?:BANK|TRUST))[ \t]*$"
    ).unwrap();

    // c. Customer entity with a corporate suffix
    pub static ref COMPANY_SUFFIX_LINE: Regex = Regex::new(
        r"(?m)^[ \t]*([A-Z0-9][A-Z0-9 ,\-]* (?:LLC|INC|CORP|CO|GROUP|COLLECTIVE))\.?[ \t]*$"
    ).unwrap();

    // d. Full legal institution name
    pub static ref LEGAL_BANK_LINE: Regex = Regex::new(
        r"(?m)^[ \t]*([A-Z][A-Z ,.\-]* (?:BANK|CREDIT UNION|TRUST|N\.A\.|FINANCIAL))[ \t]*$"
    ).unwrap();

    // e. Explicit label
    pub static ref ACCOUNT_NAME_LABEL: Regex = Regex::new(
        r"(?im)account name:[ \t]*(.+)$"
    ).unwrap();

    // f. Institution line followed by a street address
    pub static ref BANK_WITH_ADDRESS: Regex = Regex::new(
        r"(?m)^[ \t]*([A-Z][A-Z ,]*?)[ \t]*(?:BANK|TRUST)[ \t]*\n[ \t]*(\d+[ \t]*[A-Z][a-z]+ Street)"
    ).unwrap();

    // g. Any single word followed by Bank
    pub static ref WORD_BANK: Regex = Regex::new(
        r"(?i)\b(\w+)[ \t]*Bank\b"
    ).unwrap();
}
