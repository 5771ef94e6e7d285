// ANSI escape code stripping for output classification
// PTY output interleaves text with colour and cursor sequences; the classifier
// only ever looks at the plain-text view produced here.

use regex::Regex;
use std::sync::LazyLock;

/// Regex pattern for terminal control sequences
/// Matches:
/// - CSI sequences including private modes: \x1b[0m, \x1b[38;5;196m, \x1b[?25l
/// - OSC sequences terminated by BEL or ST: \x1b]0;title\x07
/// - DCS, SOS, PM and APC strings
/// - Charset designation and other two-byte escapes
/// - Remaining C0 controls except newline and tab
static ANSI_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"\x1b\[[0-?]*[ -/]*[@-~]",        // CSI sequences
        r"|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)", // OSC sequences
        r"|\x1b[PX^_][^\x1b]*\x1b\\",      // DCS, SOS, PM, APC sequences
        r"|\x1b[()][A-Za-z0-9]",           // Charset designation
        r"|\x1b[ -~]",                     // Other escape sequences
        r"|[\x00-\x08\x0b\x0c\x0d\x0e-\x1f\x7f]", // Bare control characters (keeps \t and \n)
    ))
    .expect("Invalid ANSI regex pattern")
});

/// Strip terminal control sequences from input text.
/// Total: text without escapes is returned unchanged.
pub fn strip_ansi(input: &str) -> String {
    ANSI_REGEX.replace_all(input, "").into_owned()
}
