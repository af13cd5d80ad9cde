//! Signature lines: `<name> <email> <unix-seconds> <±HHMM>`.
//!
//! Commits and tags carry author/committer/tagger identities in this form.
//! The timezone is stored as minutes east of UTC; git rejects offsets whose
//! `HHMM` magnitude reaches 1400 and such signatures keep their UTC second
//! with a zero offset.

use bstr::{BStr, BString, ByteSlice};

/// Largest accepted `±HHMM` magnitude. Anything at or past this keeps the
/// timestamp but drops to a zero offset.
const MAX_TZ_HHMM: i32 = 1400;

#[derive(Debug, thiserror::Error)]
pub enum DateError {
    #[error("malformed signature: {0}")]
    Malformed(&'static str),
}

/// A point in time as git stores it: seconds since the Unix epoch plus a
/// timezone offset in minutes east of UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Time {
    pub seconds: i64,
    pub offset_minutes: i32,
}

impl Time {
    pub fn new(seconds: i64, offset_minutes: i32) -> Self {
        Self {
            seconds,
            offset_minutes,
        }
    }

    /// Render the offset as git's `±HHMM`.
    pub fn offset_string(&self) -> String {
        let sign = if self.offset_minutes < 0 { '-' } else { '+' };
        let abs = self.offset_minutes.unsigned_abs();
        format!("{}{:02}{:02}", sign, abs / 60, abs % 60)
    }
}

/// An identity plus timestamp from a commit or tag header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: BString,
    pub email: BString,
    pub when: Time,
}

impl Signature {
    /// Parse the portion of a signature line after the header keyword,
    /// e.g. `Scott Chacon <schacon@gmail.com> 1274813907 -0700`.
    pub fn parse(line: &BStr) -> Result<Self, DateError> {
        let lt = line
            .find_byte(b'<')
            .ok_or(DateError::Malformed("missing '<'"))?;
        let gt = line[lt..]
            .find_byte(b'>')
            .map(|p| p + lt)
            .ok_or(DateError::Malformed("missing '>'"))?;

        let name = line[..lt].trim();
        let email = line[lt + 1..gt].trim();

        let rest = line[gt + 1..].trim();
        let mut fields = rest.split(|&b| b == b' ').filter(|f| !f.is_empty());

        let seconds = fields
            .next()
            .and_then(|f| std::str::from_utf8(f).ok())
            .and_then(|f| f.parse::<i64>().ok())
            .ok_or(DateError::Malformed("bad timestamp"))?;

        // The tz field is optional in practice; a missing or unusable one
        // leaves the timestamp in UTC.
        let offset_minutes = fields
            .next()
            .and_then(|f| std::str::from_utf8(f).ok())
            .and_then(|f| f.parse::<i32>().ok())
            .map(tz_to_minutes)
            .unwrap_or(0);

        Ok(Self {
            name: BString::from(name),
            email: BString::from(email),
            when: Time::new(seconds, offset_minutes),
        })
    }

    /// Canonical byte rendering of the signature (no trailing newline).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.name.len() + self.email.len() + 24);
        out.extend_from_slice(&self.name);
        out.extend_from_slice(b" <");
        out.extend_from_slice(&self.email);
        out.extend_from_slice(b"> ");
        out.extend_from_slice(self.when.seconds.to_string().as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.when.offset_string().as_bytes());
        out
    }
}

/// Convert the decimal `±HHMM` field into minutes east of UTC.
///
/// An out-of-range magnitude keeps the UTC second and drops to offset zero.
fn tz_to_minutes(hhmm: i32) -> i32 {
    if hhmm.abs() >= MAX_TZ_HHMM {
        return 0;
    }
    let sign = if hhmm < 0 { -1 } else { 1 };
    let abs = hhmm.abs();
    let minutes = abs % 100;
    if minutes > 59 {
        return 0;
    }
    sign * ((abs / 100) * 60 + minutes)
}
