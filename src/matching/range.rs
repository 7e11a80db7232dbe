use dicom_core::VR;

/// Inclusive range over DA, TM or DT values, compared on normalized digits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateTimeRange {
    vr: VR,
    lower: Option<String>,
    upper: Option<String>,
}

/// Digits of a fully specified value: YYYYMMDD, HHMMSS.FFFFFF, and both
fn width(vr: VR) -> usize {
    match vr {
        VR::DA => 8,
        VR::TM => 12,
        _ => 20,
    }
}

/// Strip separators (`:` in legacy times, `.` in dates and fractions) and
/// any DT timezone offset, then pad to full width.
fn normalize(vr: VR, value: &str, pad: char) -> Option<String> {
    let value = value.trim();
    let value = if vr == VR::DT {
        // Offsets follow the date part, which never contains a sign
        match value.get(8..).and_then(|rest| rest.find(['+', '-'])) {
            Some(pos) => &value[..8 + pos],
            None => value,
        }
    } else {
        value
    };

    let mut digits: String = value.chars().filter(|c| *c != ':' && *c != '.').collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let width = width(vr);
    if digits.len() > width {
        digits.truncate(width);
    }
    while digits.len() < width {
        digits.push(pad);
    }
    Some(digits)
}

/// Whether the `-` at `pos` of a lower bound starts a DT UTC offset
/// (`-HHMM`) rather than separating the bounds. Offsets follow at least a
/// full date and end the bound they belong to.
fn is_offset_sign(bytes: &[u8], pos: usize) -> bool {
    if pos < 8 {
        return false;
    }
    let Some(digits) = bytes.get(pos + 1..pos + 5) else {
        return false;
    };
    if !digits.iter().all(u8::is_ascii_digit) {
        return false;
    }
    let hours = (digits[0] - b'0') * 10 + (digits[1] - b'0');
    let minutes = (digits[2] - b'0') * 10 + (digits[3] - b'0');
    hours <= 14 && minutes < 60 && matches!(bytes.get(pos + 5), None | Some(b'-'))
}

/// Split a range value into its lower and upper bound text. DT values may
/// carry negative offsets, so the separator is the first `-` that is not
/// an offset sign. Returns `None` when the value is not a range.
pub fn split_bounds(vr: VR, value: &str) -> Option<(&str, &str)> {
    if vr != VR::DT {
        return value.split_once('-');
    }
    let bytes = value.as_bytes();
    (0..bytes.len())
        .filter(|&pos| bytes[pos] == b'-')
        .find(|&pos| !is_offset_sign(bytes, pos))
        .map(|pos| (&value[..pos], &value[pos + 1..]))
}

impl DateTimeRange {
    /// Parse `lo-hi`, `lo-` or `-hi`. Returns `None` for malformed ranges.
    pub fn parse(vr: VR, value: &str) -> Option<Self> {
        let (lo, hi) = split_bounds(vr, value)?;
        let lower = match lo.trim() {
            "" => None,
            lo => Some(normalize(vr, lo, '0')?),
        };
        let upper = match hi.trim() {
            "" => None,
            hi => Some(normalize(vr, hi, '9')?),
        };
        if lower.is_none() && upper.is_none() {
            return None;
        }
        Some(Self { vr, lower, upper })
    }

    pub fn contains(&self, value: &str) -> bool {
        let Some(value) = normalize(self.vr, value, '0') else {
            return false;
        };
        self.lower.as_deref().map_or(true, |lo| value.as_str() >= lo)
            && self.upper.as_deref().map_or(true, |hi| value.as_str() <= hi)
    }
}
