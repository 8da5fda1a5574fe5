//! Delimiter-based token scanner for line and token oriented protocol text.
//!
//! A [`TokenScanner`] is a cursor over a byte window. At any time it exposes
//! the current token and the delimiter that ended it:
//!
//! ```text
//!   buf: | consumed | token | delim | rest ...            |
//!                   ^start  tok_len  delim_len
//!                   |<------------ rem_len -------------->|
//!        |<------------------- tot_len ------------------>|
//! ```
//!
//! The delimiter is the earliest match of any delimiter in the set, the
//! longest one at that offset. When no delimiter is left, the remaining bytes
//! form a final token with an empty delimiter, and the scanner is at end of
//! input once both are empty.
//!
//! ```
//! use layerscope_core::scanner::{DelimiterSet, TokenScanner};
//!
//! let delims: &[&[u8]] = &[b","];
//! let set = DelimiterSet::new(delims, false);
//! let tokens: Vec<&[u8]> = TokenScanner::new(b"a,bb,ccc", set).tokens().collect();
//! assert_eq!(tokens, [&b"a"[..], b"bb", b"ccc"]);
//! ```

mod delimiter;
mod number;

pub use delimiter::{DelimiterSet, BLANKS, COLONS, COMMAS, LINES, SEMICOLONS, SPACES};
pub use number::parse_u64;

/// Cursor over a byte window. Never shared across threads.
#[derive(Debug, Clone)]
pub struct TokenScanner<'b, 'd> {
    buf: &'b [u8],
    start: usize,
    tok_len: usize,
    delim_len: usize,
    rem_len: usize,
    tot_len: usize,
    delims: DelimiterSet<'d>,
}

impl<'b, 'd> TokenScanner<'b, 'd> {
    /// Create a scanner over `buf` positioned on the first token.
    pub fn new(buf: &'b [u8], delims: DelimiterSet<'d>) -> Self {
        let mut scanner = Self {
            buf,
            start: 0,
            tok_len: 0,
            delim_len: 0,
            rem_len: buf.len(),
            tot_len: buf.len(),
            delims,
        };
        scanner.scan();
        scanner
    }

    fn scan(&mut self) {
        let window = &self.buf[self.start..self.start + self.rem_len];
        match self.delims.find(window) {
            Some((tok_len, delim_len)) => {
                self.tok_len = tok_len;
                self.delim_len = delim_len;
            }
            None => {
                self.tok_len = self.rem_len;
                self.delim_len = 0;
            }
        }
        if self.delims.collapse() {
            self.absorb_delimiters();
        }
    }

    fn absorb_delimiters(&mut self) {
        loop {
            let after = self.start + self.tok_len + self.delim_len;
            let end = self.start + self.rem_len;
            match self.delims.longest_at(&self.buf[after..end]) {
                0 => break,
                extra => self.delim_len += extra,
            }
        }
    }

    /// Move to the next token.
    pub fn next_token(&mut self) {
        self.skip(self.tok_len + self.delim_len);
        self.scan();
    }

    /// Drop `len` bytes from the front of the window without rescanning.
    /// Skipping past the window end stops at the end.
    pub fn skip(&mut self, len: usize) {
        let len = len.min(self.rem_len);
        self.start += len;
        self.rem_len -= len;
        self.tok_len = self.tok_len.saturating_sub(len);
        self.delim_len = self.delim_len.min(self.rem_len - self.tok_len);
    }

    /// Make the whole remaining window the current token.
    pub fn expand(&mut self) {
        self.tok_len = self.rem_len;
        self.delim_len = 0;
    }

    /// Extend the window to a longer buffer sharing the same prefix, e.g.
    /// after more stream data arrived. Tokens already found are kept as is.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is shorter than the current window or does not start
    /// with the bytes scanned so far.
    pub fn grow(&mut self, buf: &'b [u8]) {
        assert!(buf.len() >= self.tot_len, "grow cannot shrink the window");
        assert_eq!(
            &buf[..self.start + self.tok_len + self.delim_len],
            &self.buf[..self.start + self.tok_len + self.delim_len],
            "grow needs the same scanned prefix"
        );
        let diff = buf.len() - self.tot_len;
        self.buf = buf;
        self.rem_len += diff;
        self.tot_len += diff;
    }

    /// Current token.
    pub fn token(&self) -> &'b [u8] {
        &self.buf[self.start..self.start + self.tok_len]
    }

    /// Delimiter that ended the current token, including absorbed ones.
    pub fn delimiter(&self) -> &'b [u8] {
        let from = self.start + self.tok_len;
        &self.buf[from..from + self.delim_len]
    }

    /// Window from the current token to the end.
    pub fn remaining(&self) -> &'b [u8] {
        &self.buf[self.start..self.start + self.rem_len]
    }

    /// Bytes after the current token and its delimiter.
    pub fn rest(&self) -> &'b [u8] {
        &self.buf[self.start + self.tok_len + self.delim_len..self.start + self.rem_len]
    }

    pub fn is_eof(&self) -> bool {
        self.tok_len == 0 && self.delim_len == 0
    }

    pub fn tok_len(&self) -> usize {
        self.tok_len
    }

    pub fn delim_len(&self) -> usize {
        self.delim_len
    }

    /// Length of the window including the current token.
    pub fn rem_len(&self) -> usize {
        self.rem_len
    }

    pub fn tot_len(&self) -> usize {
        self.tot_len
    }

    /// Bytes consumed so far, counting the current token and delimiter.
    pub fn parsed(&self) -> usize {
        (self.tot_len - self.rem_len) + self.tok_len + self.delim_len
    }

    /// Copy the current token into `dest` as a NUL-terminated string,
    /// truncating to `dest.len() - 1` bytes. Returns the copied length.
    pub fn copy_token(&self, dest: &mut [u8]) -> usize {
        let Some(room) = dest.len().checked_sub(1) else {
            return 0;
        };
        let len = room.min(self.tok_len);
        dest[..len].copy_from_slice(&self.token()[..len]);
        dest[len] = 0;
        len
    }

    /// Parse the current token as an integer, see [`parse_u64`]. The second
    /// value is the offset of the first unparsed byte within the token.
    pub fn parse_int(&self, base: u32) -> (u64, usize) {
        parse_u64(self.token(), base)
    }

    /// Iterate over the remaining tokens, starting with the current one.
    pub fn tokens(self) -> Tokens<'b, 'd> {
        Tokens { scanner: self }
    }
}

/// Iterator returned by [`TokenScanner::tokens`].
#[derive(Debug, Clone)]
pub struct Tokens<'b, 'd> {
    scanner: TokenScanner<'b, 'd>,
}

impl<'b> Iterator for Tokens<'b, '_> {
    type Item = &'b [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.scanner.is_eof() {
            return None;
        }
        let token = self.scanner.token();
        self.scanner.next_token();
        Some(token)
    }
}
