//! `application/x-www-form-urlencoded` decoding.
//!
//! Browsers submit chat messages as `username=...&message=...` with every
//! value run through `encodeURIComponent`. This module turns such a body
//! into an ordered list of decoded fields.
//!
//! Decoding follows `url::form_urlencoded`: `+` is a space, `%XY` is the
//! byte `0xXY`, a `%` without two hex digits is kept as-is, and the bytes
//! are read as UTF-8 with invalid sequences replaced.

use url::form_urlencoded;

/// Decoded fields of a form body, in the order they were sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormFields {
    fields: Vec<(String, String)>,
}

impl FormFields {
    /// Split a form body on `&` and `=` and decode each side.
    ///
    /// Empty segments (`a=1&&b=2`) are skipped. A segment without `=`
    /// becomes a field with an empty value.
    pub fn parse(body: &[u8]) -> Self {
        Self {
            fields: form_urlencoded::parse(body).into_owned().collect(),
        }
    }

    /// Value of the first field named `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
