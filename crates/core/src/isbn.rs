//! ISBN and barcode validation: ISBN-10, ISBN-13, UPC-A, EAN-13.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CodeType {
    Isbn10,
    Isbn13,
    UpcA,
    /// Checksum-valid EAN-13 outside the 978/979 book prefixes.
    Ean13,
    Invalid,
}

/// A parsed ISBN or product code. Keeps the text as typed plus the
/// normalised digits (separators removed, `x` upper-cased).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Isbn {
    raw: String,
    digits: String,
    kind: CodeType,
}

impl Isbn {
    pub fn parse(text: &str) -> Self {
        let digits: String = text
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-')
            .map(|c| c.to_ascii_uppercase())
            .collect();
        let kind = classify(&digits);
        Self {
            raw: text.to_string(),
            digits,
            kind,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn digits(&self) -> &str {
        &self.digits
    }

    pub fn kind(&self) -> CodeType {
        self.kind
    }

    pub fn is_empty(&self) -> bool {
        self.digits.is_empty()
    }

    /// Strict mode accepts only real ISBNs; lenient mode also accepts
    /// checksum-valid UPC-A and EAN-13 barcodes.
    pub fn is_valid(&self, strict: bool) -> bool {
        match self.kind {
            CodeType::Isbn10 | CodeType::Isbn13 => true,
            CodeType::UpcA | CodeType::Ean13 => !strict,
            CodeType::Invalid => false,
        }
    }

    pub fn to_isbn13(&self) -> Option<String> {
        match self.kind {
            CodeType::Isbn13 => Some(self.digits.clone()),
            CodeType::Isbn10 => {
                let body = format!("978{}", &self.digits[..9]);
                let check = ean_check_digit(&body)?;
                Some(format!("{}{}", body, check))
            }
            _ => None,
        }
    }

    /// Only ISBN-10 codes and 978-prefixed ISBN-13 codes have an ISBN-10 form.
    pub fn to_isbn10(&self) -> Option<String> {
        match self.kind {
            CodeType::Isbn10 => Some(self.digits.clone()),
            CodeType::Isbn13 if self.digits.starts_with("978") => {
                let body = &self.digits[3..12];
                let check = isbn10_check_char(body)?;
                Some(format!("{}{}", body, check))
            }
            _ => None,
        }
    }

    pub fn is_isbn10_compatible(&self) -> bool {
        self.to_isbn10().is_some()
    }

    /// Two codes match when they denote the same book, regardless of the
    /// ISBN-10/13 form either was written in.
    pub fn matches(&self, other: &Isbn) -> bool {
        match (self.to_isbn13(), other.to_isbn13()) {
            (Some(a), Some(b)) => a == b,
            _ => self.is_valid(false) && self.digits == other.digits,
        }
    }
}

impl std::fmt::Display for Isbn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.digits)
    }
}

fn classify(digits: &str) -> CodeType {
    if !digits.is_ascii() {
        return CodeType::Invalid;
    }
    match digits.len() {
        10 if is_isbn10(digits) => CodeType::Isbn10,
        12 if all_digits(digits) && upc_check_digit(&digits[..11]) == digit_at(digits, 11) => {
            CodeType::UpcA
        }
        13 if all_digits(digits) && ean_check_digit(&digits[..12]) == digit_at(digits, 12) => {
            if digits.starts_with("978") || digits.starts_with("979") {
                CodeType::Isbn13
            } else {
                CodeType::Ean13
            }
        }
        _ => CodeType::Invalid,
    }
}

fn all_digits(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}

fn digit_at(s: &str, idx: usize) -> Option<u32> {
    s.as_bytes()
        .get(idx)
        .filter(|b| b.is_ascii_digit())
        .map(|b| u32::from(b - b'0'))
}

fn is_isbn10(s: &str) -> bool {
    let bytes = s.as_bytes();
    if !all_digits(&s[..9]) {
        return false;
    }
    let last = match bytes[9] {
        b'X' => 10,
        b @ b'0'..=b'9' => u32::from(b - b'0'),
        _ => return false,
    };
    let sum: u32 = bytes[..9]
        .iter()
        .enumerate()
        .map(|(i, b)| (10 - i as u32) * u32::from(b - b'0'))
        .sum::<u32>()
        + last;
    sum % 11 == 0
}

fn isbn10_check_char(body: &str) -> Option<char> {
    if body.len() != 9 || !all_digits(body) {
        return None;
    }
    let sum: u32 = body
        .bytes()
        .enumerate()
        .map(|(i, b)| (10 - i as u32) * u32::from(b - b'0'))
        .sum();
    match (11 - sum % 11) % 11 {
        10 => Some('X'),
        d => char::from_digit(d, 10),
    }
}

fn ean_check_digit(body: &str) -> Option<u32> {
    if body.len() != 12 || !all_digits(body) {
        return None;
    }
    let sum: u32 = body
        .bytes()
        .enumerate()
        .map(|(i, b)| u32::from(b - b'0') * if i % 2 == 0 { 1 } else { 3 })
        .sum();
    Some((10 - sum % 10) % 10)
}

fn upc_check_digit(body: &str) -> Option<u32> {
    if body.len() != 11 || !all_digits(body) {
        return None;
    }
    let sum: u32 = body
        .bytes()
        .enumerate()
        .map(|(i, b)| u32::from(b - b'0') * if i % 2 == 0 { 3 } else { 1 })
        .sum();
    Some((10 - sum % 10) % 10)
}
