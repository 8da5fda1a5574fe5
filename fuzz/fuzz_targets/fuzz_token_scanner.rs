//! Fuzz target for the token scanner.
//!
//! The first byte picks a delimiter set and the collapse flag, the rest is
//! scanned. Tokens and delimiters must tile the input exactly.

#![no_main]

use layerscope_core::scanner::{DelimiterSet, TokenScanner, BLANKS, COMMAS, LINES};
use libfuzzer_sys::fuzz_target;

const MIXED: &[&[u8]] = &[b",", b",,", b"\r\n", b";", b"ab"];

fuzz_target!(|data: &[u8]| {
    let Some((&selector, input)) = data.split_first() else {
        return;
    };
    let delims = match selector % 4 {
        0 => LINES,
        1 => COMMAS,
        2 => BLANKS,
        _ => DelimiterSet::new(MIXED, selector & 0x80 != 0),
    };

    let mut scanner = TokenScanner::new(input, delims);
    let mut covered = 0;
    loop {
        let token = scanner.token();
        let delim = scanner.delimiter();
        assert_eq!(token, &input[covered..covered + token.len()]);
        covered += token.len() + delim.len();
        assert!(covered <= input.len());

        let mut copy = [0u8; 8];
        let copied = scanner.copy_token(&mut copy);
        assert!(copied < copy.len());
        assert_eq!(copy[copied], 0);

        if scanner.is_eof() {
            break;
        }
        scanner.next_token();
    }
    assert_eq!(covered, input.len());
});
