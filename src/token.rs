//! Line tokenizer.
//!
//! Grounded on `original_source/evil/utils.py`'s `tokenize`: whitespace
//! outside quotes separates tokens, quoted literals preserve interior
//! whitespace and backslash escapes (including `\xHH...` hex runs), and
//! `<<`/`>>` are the only multi-character punctuation tokens. A character
//! outside every recognized class is a tokenizer error there (`raise
//! ValueError`) and here ([`TokenizeError`]), not a silently dropped byte.

use crate::error::TokenizeError;

/// A single lexical token: an identifier/number run, a quoted literal
/// (string or character, including its delimiting quotes), or a single-
/// or double-character punctuation symbol.
pub type Token = String;

const IDENTIFIER_EXTRA: [char; 2] = ['_', '.'];

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || IDENTIFIER_EXTRA.contains(&c)
}

/// Splits a single source line (with any trailing comment already
/// stripped) into tokens.
///
/// Fails with [`TokenizeError::UnrecognizedCharacter`] on the first
/// character matching none of the tokenizer's recognized classes.
pub fn tokenize(text: &str) -> Result<Vec<Token>, TokenizeError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut idx = 0;

    while idx < chars.len() {
        let c = chars[idx];
        if c == '"' || c == '\'' {
            let (literal, consumed) = parse_quote(&chars[idx + 1..], c);
            tokens.push(format!("{c}{literal}"));
            idx += 1 + consumed;
        } else if c.is_ascii_punctuation() {
            let (op, consumed) = parse_punctuation(&chars[idx..]);
            tokens.push(op);
            idx += consumed;
        } else if is_identifier_char(c) {
            let consumed = 1 + count_while(&chars[idx + 1..], is_identifier_char);
            tokens.push(chars[idx..idx + consumed].iter().collect());
            idx += consumed;
        } else if c.is_whitespace() {
            idx += 1 + count_while(&chars[idx + 1..], |c| c.is_whitespace());
        } else {
            return Err(TokenizeError::UnrecognizedCharacter(c));
        }
    }

    Ok(tokens)
}

fn count_while(chars: &[char], pred: impl Fn(char) -> bool) -> usize {
    chars.iter().take_while(|&&c| pred(c)).count()
}

/// Parses the body of a quoted literal (the text after the opening quote
/// character), returning the body (escapes included verbatim) and the
/// number of input characters consumed, including a closing quote if
/// present. An unterminated literal consumes the rest of the input.
fn parse_quote(chars: &[char], quote_char: char) -> (String, usize) {
    let mut body = String::new();
    let mut idx = 0;
    while idx < chars.len() {
        let mut size = 1;
        if chars[idx] == '\\' {
            size += parse_escape(&chars[idx + 1..]);
            body.extend(&chars[idx..idx + size]);
        } else if chars[idx] == quote_char {
            body.push(chars[idx]);
            return (body, idx + size);
        } else {
            body.push(chars[idx]);
        }
        idx += size;
    }
    (body, chars.len())
}

fn parse_escape(chars: &[char]) -> usize {
    if chars.is_empty() {
        return 0;
    }
    if chars[0] == 'x' {
        1 + count_while(&chars[1..], |c| c.is_ascii_hexdigit())
    } else {
        1
    }
}

const MULTI_CHAR_OPERATORS: [&str; 2] = ["<<", ">>"];

fn parse_punctuation(chars: &[char]) -> (Token, usize) {
    for op in MULTI_CHAR_OPERATORS {
        if chars.len() >= op.len() && chars[..op.len()].iter().collect::<String>() == op {
            return (op.to_string(), op.len());
        }
    }
    (chars[0].to_string(), 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_whitespace() {
        assert_eq!(tokenize("movb.i2r A, 1").unwrap(), vec!["movb.i2r", "A", ",", "1"]);
    }

    #[test]
    fn preserves_whitespace_in_strings() {
        assert_eq!(tokenize(r#""a b""#).unwrap(), vec![r#""a b""#]);
    }

    #[test]
    fn recognizes_shift_operators() {
        assert_eq!(tokenize("1 << 2").unwrap(), vec!["1", "<<", "2"]);
        assert_eq!(tokenize("1>>2").unwrap(), vec!["1", ">>", "2"]);
    }

    #[test]
    fn unterminated_quote_consumes_remainder() {
        assert_eq!(tokenize(r#""abc"#).unwrap(), vec![r#""abc"#]);
    }

    #[test]
    fn hex_escape_consumes_digit_run() {
        assert_eq!(tokenize(r#""\x41\x42""#).unwrap(), vec![r#""\x41\x42""#]);
    }

    #[test]
    fn identifier_allows_dots_and_underscores() {
        assert_eq!(tokenize("movw.r2r").unwrap(), vec!["movw.r2r"]);
        assert_eq!(tokenize("foo_bar").unwrap(), vec!["foo_bar"]);
    }

    #[test]
    fn unrecognized_character_is_an_error() {
        assert_eq!(tokenize("A ಠ B"), Err(TokenizeError::UnrecognizedCharacter('ಠ')));
    }
}
