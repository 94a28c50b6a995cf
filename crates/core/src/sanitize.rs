//! Text sanitizer trait and the default implementation.

/// Cleans user-supplied text before it enters a conversation.
///
/// Must be pure and total: every input maps to some output, never an error.
pub trait TextSanitizer: Send + Sync {
    fn sanitize(&self, text: &str) -> String;
}

/// Drops characters that render invisibly or reorder text.
///
/// Removes control characters except newline and tab, zero-width
/// characters, and bidirectional overrides/isolates. Everything else is
/// kept as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlCharSanitizer;

impl ControlCharSanitizer {
    fn is_unwanted(c: char) -> bool {
        match c {
            '\n' | '\t' => false,
            '\u{200B}'..='\u{200F}' | '\u{2028}'..='\u{202E}' | '\u{2060}'..='\u{2069}' => true,
            '\u{FEFF}' => true,
            c => c.is_control(),
        }
    }
}

impl TextSanitizer for ControlCharSanitizer {
    fn sanitize(&self, text: &str) -> String {
        text.chars().filter(|c| !Self::is_unwanted(*c)).collect()
    }
}
