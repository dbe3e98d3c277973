//! Word-level tokenizer for one normalized G-code line.
//!
//! Input lines arrive from the protocol layer already trimmed, uppercased,
//! and comment-free. The tokenizer produces a [`GcodeBlock`]; it performs
//! no modal interpretation.

use super::GcodeError;

/// Structured form of one parsed line.
///
/// A field is `Some` exactly when the corresponding word appeared on the
/// line. At most one G-number and one M-number are accepted per block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GcodeBlock {
    pub g: Option<u16>,
    pub m: Option<u16>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub i: Option<f64>,
    pub j: Option<f64>,
    pub r: Option<f64>,
    pub f: Option<f64>,
    pub s: Option<f64>,
    pub p: Option<f64>,
}

impl GcodeBlock {
    /// `true` when no word was present (a blank line parses to this).
    pub fn is_empty(&self) -> bool {
        *self == GcodeBlock::default()
    }
}

/// Tokenizes `line` into a [`GcodeBlock`].
///
/// * G and M take a decimal integer immediately after the letter.
/// * X, Y, I, J, R, F, S, P take a signed decimal float.
/// * Unrecognized letter words are skipped up to the next whitespace.
/// * A malformed numeric literal is [`GcodeError::InvalidParam`].
/// * An empty line yields an empty block.
pub fn parse_line(line: &str) -> Result<GcodeBlock, GcodeError> {
    let mut block = GcodeBlock::default();
    let bytes = line.as_bytes();
    let mut pos = 0;

    while pos < bytes.len() {
        let ch = bytes[pos] as char;
        if ch.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        match ch {
            'G' | 'M' => {
                pos += 1;
                let value = take_integer(bytes, &mut pos)
                    .ok_or_else(|| GcodeError::InvalidParam(format!("bad number after {ch}")))?;
                let slot = if ch == 'G' { &mut block.g } else { &mut block.m };
                if slot.is_some() {
                    return Err(GcodeError::InvalidParam(format!(
                        "multiple {ch} words in one block"
                    )));
                }
                *slot = Some(value);
            }
            'X' | 'Y' | 'I' | 'J' | 'R' | 'F' | 'S' | 'P' => {
                pos += 1;
                let value = take_float(bytes, &mut pos)
                    .ok_or_else(|| GcodeError::InvalidParam(format!("bad number after {ch}")))?;
                let slot = match ch {
                    'X' => &mut block.x,
                    'Y' => &mut block.y,
                    'I' => &mut block.i,
                    'J' => &mut block.j,
                    'R' => &mut block.r,
                    'F' => &mut block.f,
                    'S' => &mut block.s,
                    _ => &mut block.p,
                };
                *slot = Some(value);
            }
            _ => {
                // Unrecognized word: consume through the next whitespace.
                while pos < bytes.len() && !(bytes[pos] as char).is_ascii_whitespace() {
                    pos += 1;
                }
            }
        }
    }

    Ok(block)
}

/// Consumes a decimal integer at `*pos`; `None` when no digit is present.
fn take_integer(bytes: &[u8], pos: &mut usize) -> Option<u16> {
    let start = *pos;
    while *pos < bytes.len() && bytes[*pos].is_ascii_digit() {
        *pos += 1;
    }
    if *pos == start {
        return None;
    }
    std::str::from_utf8(&bytes[start..*pos])
        .ok()
        .and_then(|s| s.parse().ok())
}

/// Consumes a signed decimal float at `*pos`; `None` when the characters
/// at the cursor do not form a number.
fn take_float(bytes: &[u8], pos: &mut usize) -> Option<f64> {
    let start = *pos;
    if *pos < bytes.len() && (bytes[*pos] == b'+' || bytes[*pos] == b'-') {
        *pos += 1;
    }
    let mut digits = 0;
    while *pos < bytes.len() && bytes[*pos].is_ascii_digit() {
        *pos += 1;
        digits += 1;
    }
    if *pos < bytes.len() && bytes[*pos] == b'.' {
        *pos += 1;
        while *pos < bytes.len() && bytes[*pos].is_ascii_digit() {
            *pos += 1;
            digits += 1;
        }
    }
    if digits == 0 {
        *pos = start;
        return None;
    }
    std::str::from_utf8(&bytes[start..*pos])
        .ok()
        .and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── word recognition ─────────────────────────────────────────────────────

    #[test]
    fn simple_linear_move_parses() {
        let block = parse_line("G01 X50 Y0 F200").expect("valid line");
        assert_eq!(block.g, Some(1));
        assert_eq!(block.x, Some(50.0));
        assert_eq!(block.y, Some(0.0));
        assert_eq!(block.f, Some(200.0));
        assert_eq!(block.m, None);
    }

    #[test]
    fn g_with_leading_zero_parses() {
        let block = parse_line("G00").expect("valid line");
        assert_eq!(block.g, Some(0));
        let block = parse_line("G02").expect("valid line");
        assert_eq!(block.g, Some(2));
    }

    #[test]
    fn m_word_with_spindle_speed() {
        let block = parse_line("M03 S1500").expect("valid line");
        assert_eq!(block.m, Some(3));
        assert_eq!(block.s, Some(1500.0));
    }

    #[test]
    fn arc_words_parse_signed_floats() {
        let block = parse_line("G02 X0 Y10 I-10 J0 F300").expect("valid line");
        assert_eq!(block.i, Some(-10.0));
        assert_eq!(block.j, Some(0.0));
        assert_eq!(block.r, None);
    }

    #[test]
    fn decimal_and_explicit_plus_parse() {
        let block = parse_line("X+1.25 Y-0.5 R2.").expect("valid line");
        assert_eq!(block.x, Some(1.25));
        assert_eq!(block.y, Some(-0.5));
        assert_eq!(block.r, Some(2.0));
    }

    #[test]
    fn bare_decimal_point_value_parses() {
        let block = parse_line("X.5").expect("valid line");
        assert_eq!(block.x, Some(0.5));
    }

    #[test]
    fn whitespace_between_words_is_ignored() {
        let a = parse_line("G01X10Y20F100").expect("packed line");
        let b = parse_line("G01   X10\tY20  F100").expect("spaced line");
        assert_eq!(a, b);
    }

    // ── empty and unknown ────────────────────────────────────────────────────

    #[test]
    fn empty_line_yields_empty_block() {
        let block = parse_line("").expect("empty line is ok");
        assert!(block.is_empty());
    }

    #[test]
    fn unrecognized_word_is_skipped() {
        let block = parse_line("N10 G01 X5 F100").expect("N word skipped");
        assert_eq!(block.g, Some(1));
        assert_eq!(block.x, Some(5.0));
    }

    #[test]
    fn unrecognized_word_skips_to_whitespace_only() {
        // The junk word must not swallow the following X word.
        let block = parse_line("Q99Z7 X5").expect("junk skipped");
        assert_eq!(block.x, Some(5.0));
    }

    // ── malformed input ──────────────────────────────────────────────────────

    #[test]
    fn g_without_number_is_invalid() {
        let err = parse_line("G X10").unwrap_err();
        assert!(matches!(err, GcodeError::InvalidParam(_)));
    }

    #[test]
    fn x_without_number_is_invalid() {
        let err = parse_line("G01 X").unwrap_err();
        assert!(matches!(err, GcodeError::InvalidParam(_)));
    }

    #[test]
    fn sign_without_digits_is_invalid() {
        let err = parse_line("X- Y10").unwrap_err();
        assert!(matches!(err, GcodeError::InvalidParam(_)));
    }

    #[test]
    fn duplicate_g_words_rejected() {
        let err = parse_line("G90 G01 X10").unwrap_err();
        assert!(matches!(err, GcodeError::InvalidParam(_)));
    }

    #[test]
    fn duplicate_axis_word_last_wins() {
        let block = parse_line("X1 X2").expect("duplicate axis tolerated");
        assert_eq!(block.x, Some(2.0));
    }
}
