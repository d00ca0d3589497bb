//! Kernel command line parsing utilities.
//!
//! This module provides functionality for parsing the command line the
//! system was booted with, supporting both key-only switches and
//! key=value pairs with proper quote handling.  The argument builder uses
//! it to echo a fixed allow-list of arguments into new configurations.

use std::borrow::Cow;

use anyhow::Result;

/// A parsed kernel command line.
///
/// Wraps the raw command line and provides methods for iterating over
/// individual parameters.  Uses copy-on-write semantics to avoid
/// unnecessary allocations when working with borrowed data.
#[derive(Debug)]
pub struct Cmdline<'a>(Cow<'a, str>);

impl<'a> From<&'a str> for Cmdline<'a> {
    fn from(input: &'a str) -> Self {
        Self(Cow::Borrowed(input))
    }
}

impl<'a> Cmdline<'a> {
    /// Reads the kernel command line from `/proc/cmdline`.
    pub fn from_proc() -> Result<Self> {
        Ok(Self(Cow::Owned(std::fs::read_to_string("/proc/cmdline")?)))
    }

    /// Returns an iterator over all parameters in the command line.
    ///
    /// Properly handles quoted values containing whitespace and splits on
    /// unquoted whitespace characters.
    pub fn iter(&'a self) -> impl Iterator<Item = Parameter<'a>> + 'a {
        let mut in_quotes = false;

        self.0
            .split(move |c: char| {
                if c == '"' {
                    in_quotes = !in_quotes;
                }
                !in_quotes && c.is_ascii_whitespace()
            })
            .filter(|s| !s.is_empty())
            .map(Parameter::from)
    }

    /// Locate a kernel argument with the given key name.
    ///
    /// Returns the first parameter matching the given key, or `None` if
    /// not found.  Key comparison treats dashes and underscores as
    /// equivalent.
    pub fn find(&'a self, key: &str) -> Option<Parameter<'a>> {
        self.iter().find(|p| key_eq(p.key, key))
    }

    /// Locate the value of the kernel argument with the given key name.
    pub fn value_of(&'a self, key: &str) -> Option<&'a str> {
        self.find(key).and_then(|p| p.value)
    }
}

/// Compare two parameter keys, treating dashes and underscores as
/// equivalent.  This comparison is case-sensitive.
pub(crate) fn key_eq(a: &str, b: &str) -> bool {
    let dedashed = |c: char| if c == '-' { '_' } else { c };

    // We can't just zip() because leading substrings will match
    //
    // For example, "foo" == "foobar" since the zipped iterator
    // only compares the first three chars.
    let a = a.chars().map(dedashed);
    let b = b.chars().map(dedashed);
    a.eq(b)
}

/// A single kernel command line parameter.
#[derive(Debug, PartialEq, Eq)]
pub struct Parameter<'a> {
    /// The full original value
    pub parameter: &'a str,
    /// The parameter key
    pub key: &'a str,
    /// The parameter value, if present
    pub value: Option<&'a str>,
}

impl<'a> From<&'a str> for Parameter<'a> {
    /// Parses a parameter from its textual form.
    ///
    /// Splits on the first `=` character to separate key and value.
    /// Strips only the outermost pair of double quotes from values.
    /// If no `=` is found, treats the entire input as a key-only
    /// parameter.
    fn from(parameter: &'a str) -> Self {
        let (key, value) = if let Some((key, value)) = parameter.split_once('=') {
            // *Only* the first and last double quotes are stripped
            let value = value
                .strip_prefix('"')
                .unwrap_or(value)
                .strip_suffix('"')
                .unwrap_or(value);
            (key, Some(value))
        } else {
            (parameter, None)
        };
        Self {
            parameter,
            key,
            value,
        }
    }
}
