//! Delimiter sets.

/// An ordered list of delimiter strings plus the collapse flag.
///
/// With `collapse` set, a run of delimiters following a token counts as a
/// single delimiter, so repeated separators never yield empty tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelimiterSet<'d> {
    delims: &'d [&'d [u8]],
    collapse: bool,
}

impl<'d> DelimiterSet<'d> {
    pub const fn new(delims: &'d [&'d [u8]], collapse: bool) -> Self {
        Self { delims, collapse }
    }

    pub fn delimiters(&self) -> &'d [&'d [u8]] {
        self.delims
    }

    pub fn collapse(&self) -> bool {
        self.collapse
    }

    /// Length of the longest delimiter matching at the very start of
    /// `window`, or 0.
    pub(crate) fn longest_at(&self, window: &[u8]) -> usize {
        self.delims
            .iter()
            .filter(|d| !d.is_empty() && window.starts_with(d))
            .map(|d| d.len())
            .max()
            .unwrap_or(0)
    }

    /// Earliest delimiter occurrence in `window` as `(offset, len)`. At the
    /// earliest offset the longest delimiter wins, whatever the list order.
    pub(crate) fn find(&self, window: &[u8]) -> Option<(usize, usize)> {
        (0..window.len()).find_map(|offset| match self.longest_at(&window[offset..]) {
            0 => None,
            len => Some((offset, len)),
        })
    }
}

const LINE_DELIMS: &[&[u8]] = &[b"\r\n", b"\n"];
const BLANK_DELIMS: &[&[u8]] = &[b" ", b"\r\n", b"\n"];
const SPACE_DELIMS: &[&[u8]] = &[b" "];
const COLON_DELIMS: &[&[u8]] = &[b": ", b":"];
const SEMICOLON_DELIMS: &[&[u8]] = &[b"; ", b";"];
const COMMA_DELIMS: &[&[u8]] = &[b","];

/// CRLF or LF line ends. Empty lines are kept.
pub const LINES: DelimiterSet<'static> = DelimiterSet::new(LINE_DELIMS, false);
/// Any run of spaces and line ends.
pub const BLANKS: DelimiterSet<'static> = DelimiterSet::new(BLANK_DELIMS, true);
/// Runs of spaces.
pub const SPACES: DelimiterSet<'static> = DelimiterSet::new(SPACE_DELIMS, true);
/// Header-style `name: value` separators.
pub const COLONS: DelimiterSet<'static> = DelimiterSet::new(COLON_DELIMS, true);
pub const SEMICOLONS: DelimiterSet<'static> = DelimiterSet::new(SEMICOLON_DELIMS, true);
/// Single commas, empty fields kept.
pub const COMMAS: DelimiterSet<'static> = DelimiterSet::new(COMMA_DELIMS, false);
