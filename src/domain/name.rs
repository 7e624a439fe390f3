//! Validated identifiers shared by usernames and room names.
//!
//! Character set (per spec §6): any non-control Unicode codepoint except
//! `:`, `{`, `}`, and DEL (U+007F); must be non-empty.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{invalid_name, Error};

/// Checks a raw string against the admissible character set. Does not check
/// emptiness — callers that need a named entity should reject `""` via the
/// newtype constructors below, which do.
fn has_forbidden_chars(s: &str) -> bool {
    s.chars()
        .any(|c| c.is_control() || c == ':' || c == '{' || c == '}')
}

/// Validates `s` as a room/user identifier, returning the typed error the
/// spec names (`invalidName`) on failure.
pub fn validate_name(s: &str) -> Result<(), Error> {
    if s.is_empty() || has_forbidden_chars(s) {
        return Err(invalid_name([s]));
    }
    Ok(())
}

macro_rules! validated_name_type {
    ($name:ident) => {
        /// A validated identifier. Construction is the only way to obtain
        /// one, so every holder of a value is known-valid.
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Result<Self, Error> {
                let s = s.into();
                validate_name(&s)?;
                Ok(Self(s))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = Error;

            fn try_from(value: String) -> Result<Self, Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> String {
                value.0
            }
        }
    };
}

validated_name_type!(Username);
validated_name_type!(RoomNameInner);

/// A room's key uses the same validation rule as a username but is kept as
/// a distinct type so the two can't be accidentally swapped at call sites.
pub type RoomName = RoomNameInner;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty() {
        assert!(Username::new("").is_err());
    }

    #[test]
    fn rejects_forbidden_chars() {
        assert!(Username::new("a:b").is_err());
        assert!(Username::new("a{b").is_err());
        assert!(Username::new("a}b").is_err());
        assert!(Username::new("a\u{7f}b").is_err());
        assert!(Username::new("a\nb").is_err());
    }

    #[test]
    fn accepts_unicode_non_control() {
        assert!(Username::new("élan").is_ok());
        assert!(Username::new("日本語").is_ok());
    }

    #[test]
    fn room_name_and_username_share_rule() {
        assert!(RoomName::new("room:1").is_err());
        assert!(RoomName::new("room-1").is_ok());
    }
}
</content>
