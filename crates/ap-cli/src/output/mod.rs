//! User-facing status messages
//!
//! stdout carries the SSH byte stream, so every message goes to stderr.

use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

fn print_tagged(color: Color, tag: &str, msg: &str) {
    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(color),
        Print(tag),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    print_tagged(Color::Green, "✓ ", msg);
}

/// Print an error message in red with an X prefix
pub fn print_error(msg: &str) {
    print_tagged(Color::Red, "✗ ", msg);
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    print_tagged(Color::Cyan, "ℹ ", msg);
}
