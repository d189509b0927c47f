//! Substitution targets and their unsafe character sets.

use std::fmt;

use ti_core::{Error, OsFamily, Result};

/// Characters that are never allowed in a substituted scalar.
const COMMON_UNSAFE: &[char] = &['"', '\n', '\r', '\0'];

const POSIX_SHELL_UNSAFE: &[char] = &[
    '"', '\n', '\r', '\0', '`', '$', '\\', ';', '&', '|', '<', '>', '!', '\'', '(', ')',
];

const WINDOWS_BATCH_UNSAFE: &[char] =
    &['"', '\n', '\r', '\0', '%', '^', '&', '|', '<', '>', '!', '(', ')'];

const SCRIPT_UNSAFE: &[char] = &['"', '\n', '\r', '\0', '\\', '`'];

/// The kind of text a template is rendered into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubstitutionContext {
    /// Command text run by `sh -c`.
    PosixShell,
    /// Command text written into a `.bat` file.
    WindowsBatch,
    /// Source evaluated by the embedded script engine.
    Script,
}

impl SubstitutionContext {
    /// Command dialect for a host OS family.
    pub fn for_os(os: OsFamily) -> Self {
        match os {
            OsFamily::Windows => Self::WindowsBatch,
            OsFamily::Unix => Self::PosixShell,
        }
    }

    pub fn unsafe_chars(self) -> &'static [char] {
        match self {
            Self::PosixShell => POSIX_SHELL_UNSAFE,
            Self::WindowsBatch => WINDOWS_BATCH_UNSAFE,
            Self::Script => SCRIPT_UNSAFE,
        }
    }

    /// First unsafe character of `value` in this context.
    pub fn first_unsafe(self, value: &str) -> Option<char> {
        let unsafe_chars = self.unsafe_chars();
        value.chars().find(|c| unsafe_chars.contains(c))
    }

    /// Reject `value` if it contains a character unsafe for this context.
    ///
    /// `origin` names where the value came from, e.g. `input 'username'`.
    pub fn check(self, value: &str, origin: &str) -> Result<()> {
        match self.first_unsafe(value) {
            None => Ok(()),
            Some(offending) => Err(Error::SubstitutionSecurity {
                value: value.to_string(),
                origin: format!("Value '{}' from {}", value.escape_debug(), origin),
                context: self.to_string(),
                offending,
            }),
        }
    }
}

impl fmt::Display for SubstitutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PosixShell => f.write_str("Linux shell"),
            Self::WindowsBatch => f.write_str("Windows batch"),
            Self::Script => f.write_str("script"),
        }
    }
}
