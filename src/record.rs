//! Line-oriented perturbation record
//!
//! ```text
//! line1: integer bodyId
//! line2: integer rootFrame
//! line3: float   nodeSigma
//! line4: float   grabbedOffsetX
//! line5: float   grabbedOffsetY
//! line6: float   grabbedOffsetZ
//! ```
//!
//! Lines are read in order. A line that is present but not numeric reads
//! as zero (C `strtol`/`strtod` semantics: leading whitespace, optional
//! sign, longest numeric prefix). A missing line stops parsing; later
//! fields stay `None`.

use std::fmt;

use crate::types::Vec3;

/// Fully parsed record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerturbationRecord {
    pub body_id: i32,
    pub root_frame: i32,
    pub node_sigma: f64,
    pub offset: Vec3,
}

impl fmt::Display for PerturbationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.body_id)?;
        writeln!(f, "{}", self.root_frame)?;
        writeln!(f, "{}", self.node_sigma)?;
        writeln!(f, "{}", self.offset.x)?;
        writeln!(f, "{}", self.offset.y)?;
        writeln!(f, "{}", self.offset.z)
    }
}

/// Record as far as the input went
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PartialRecord {
    pub body_id: Option<i32>,
    pub root_frame: Option<i32>,
    pub node_sigma: Option<f64>,
    pub offset: [Option<f64>; 3],
}

impl PartialRecord {
    pub const FIELD_COUNT: usize = 6;

    pub fn parse(text: &str) -> Self {
        let mut record = Self::default();
        let mut lines = text.lines();

        let Some(line) = lines.next() else { return record };
        record.body_id = Some(parse_leading_int(line));
        let Some(line) = lines.next() else { return record };
        record.root_frame = Some(parse_leading_int(line));
        let Some(line) = lines.next() else { return record };
        record.node_sigma = Some(parse_leading_float(line));

        for axis in record.offset.iter_mut() {
            let Some(line) = lines.next() else { return record };
            *axis = Some(parse_leading_float(line));
        }
        record
    }

    /// Number of leading fields that were present
    pub fn field_count(&self) -> usize {
        [self.body_id.is_some(), self.root_frame.is_some(), self.node_sigma.is_some()]
            .into_iter()
            .chain(self.offset.iter().map(Option::is_some))
            .filter(|present| *present)
            .count()
    }

    pub fn complete(&self) -> Option<PerturbationRecord> {
        let [Some(x), Some(y), Some(z)] = self.offset else {
            return None;
        };
        Some(PerturbationRecord {
            body_id: self.body_id?,
            root_frame: self.root_frame?,
            node_sigma: self.node_sigma?,
            offset: Vec3::new(x, y, z),
        })
    }
}

/// `strtol(s, NULL, 10)` saturated to `i32`
pub fn parse_leading_int(s: &str) -> i32 {
    let s = s.trim_start();
    let (negative, digits) = split_sign(s);

    let mut value: i64 = 0;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        value = value.saturating_mul(10).saturating_add(i64::from(b - b'0'));
    }
    if negative {
        value = -value;
    }
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// `strtod(s, NULL)` for decimal notation; no numeric prefix reads as 0.0
pub fn parse_leading_float(s: &str) -> f64 {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }

    let int_digits = count_digits(&bytes[end..]);
    end += int_digits;

    let mut frac_digits = 0;
    if bytes.get(end) == Some(&b'.') {
        frac_digits = count_digits(&bytes[end + 1..]);
        if int_digits + frac_digits > 0 {
            end += 1 + frac_digits;
        }
    }

    if int_digits + frac_digits == 0 {
        return parse_special(s).unwrap_or(0.0);
    }

    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits = count_digits(&bytes[exp_end.min(bytes.len())..]);
        if exp_digits > 0 {
            end = exp_end + exp_digits;
        }
    }

    s[..end].parse().unwrap_or(0.0)
}

fn split_sign(s: &str) -> (bool, &str) {
    if let Some(rest) = s.strip_prefix('-') {
        (true, rest)
    } else {
        (false, s.strip_prefix('+').unwrap_or(s))
    }
}

fn count_digits(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|b| b.is_ascii_digit()).count()
}

fn parse_special(s: &str) -> Option<f64> {
    let (negative, rest) = split_sign(s);
    let lower = rest.get(..3)?.to_ascii_lowercase();
    let value = match lower.as_str() {
        "inf" => f64::INFINITY,
        "nan" => f64::NAN,
        _ => return None,
    };
    Some(if negative { -value } else { value })
}
