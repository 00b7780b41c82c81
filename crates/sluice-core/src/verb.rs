//! HTTP verbs and verb masks.

use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The verb a request was issued with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl Verb {
    /// All verbs, in mask bit order.
    pub const ALL: [Verb; 7] = [
        Verb::Get,
        Verb::Post,
        Verb::Put,
        Verb::Patch,
        Verb::Delete,
        Verb::Head,
        Verb::Options,
    ];

    /// Returns the upper-case wire name of this verb.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }

    const fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown verb.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown verb: {0}")]
pub struct UnknownVerb(pub String);

impl FromStr for Verb {
    type Err = UnknownVerb;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownVerb(s.to_string()))
    }
}

/// A set of verbs a filter attribute applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ApplyTo(u16);

impl ApplyTo {
    pub const NONE: Self = Self(0);
    pub const GET: Self = Self(Verb::Get.bit());
    pub const POST: Self = Self(Verb::Post.bit());
    pub const PUT: Self = Self(Verb::Put.bit());
    pub const PATCH: Self = Self(Verb::Patch.bit());
    pub const DELETE: Self = Self(Verb::Delete.bit());
    pub const HEAD: Self = Self(Verb::Head.bit());
    pub const OPTIONS: Self = Self(Verb::Options.bit());
    pub const ALL: Self = Self((1 << Verb::ALL.len()) - 1);

    /// Returns `true` if `verb` is part of this set.
    pub fn contains(self, verb: Verb) -> bool {
        self.0 & verb.bit() != 0
    }
}

impl Default for ApplyTo {
    fn default() -> Self {
        Self::ALL
    }
}

impl BitOr for ApplyTo {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl From<Verb> for ApplyTo {
    fn from(verb: Verb) -> Self {
        Self(verb.bit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("get".parse::<Verb>().unwrap(), Verb::Get);
        assert_eq!("PATCH".parse::<Verb>().unwrap(), Verb::Patch);
        assert!("BREW".parse::<Verb>().is_err());
    }

    #[test]
    fn apply_to_masks() {
        let mask = ApplyTo::GET | ApplyTo::DELETE;
        assert!(mask.contains(Verb::Get));
        assert!(mask.contains(Verb::Delete));
        assert!(!mask.contains(Verb::Post));
        assert!(Verb::ALL.iter().all(|v| ApplyTo::ALL.contains(*v)));
        assert!(Verb::ALL.iter().all(|v| !ApplyTo::NONE.contains(*v)));
    }
}
