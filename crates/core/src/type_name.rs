//! Parsing of `"Type/Name"` and `"Type/Name:invert"` configuration tokens.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};

/// A `"Type/Name"` pair. A bare `"Name"` means the type equals the name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeNameString {
    type_name: String,
    name: String,
}

impl TypeNameString {
    /// Build from explicit parts.
    pub fn new(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            name: name.into(),
        }
    }

    /// Parse `"Type/Name"` or `"Name"`.
    pub fn parse(token: &str) -> Result<Self> {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(malformed(token, "empty token"));
        }

        match trimmed.split_once('/') {
            None => Ok(Self::new(trimmed, trimmed)),
            Some((type_name, name)) => {
                if type_name.is_empty() {
                    return Err(malformed(token, "empty type"));
                }
                if name.is_empty() {
                    return Err(malformed(token, "empty name"));
                }
                if name.contains('/') {
                    return Err(malformed(token, "more than one '/'"));
                }
                Ok(Self::new(type_name, name))
            }
        }
    }

    /// The constructable type.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The instance name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the name was given explicitly (type differs from name).
    pub fn has_explicit_name(&self) -> bool {
        self.type_name != self.name
    }
}

impl std::fmt::Display for TypeNameString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.has_explicit_name() {
            write!(f, "{}/{}", self.type_name, self.name)
        } else {
            f.write_str(&self.name)
        }
    }
}

/// A member list entry: a unit reference plus its invert flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberToken {
    /// Type and instance name
    pub type_name: TypeNameString,
    /// Whether the member's filter decision is inverted
    pub invert: bool,
}

impl MemberToken {
    /// Parse `"Type/Name"`, `"Type/Name:invert"`, `"Name"` or `"Name:invert"`.
    ///
    /// `::` namespace separators are never taken for the invert separator.
    pub fn parse(token: &str) -> Result<Self> {
        let parsed = TypeNameString::parse(token)?;
        let name = parsed.name();

        let Some(pos) = invert_separator(name) else {
            return Ok(Self {
                type_name: parsed,
                invert: false,
            });
        };

        let suffix = &name[pos + 1..];
        if suffix != "invert" {
            return Err(malformed(token, &format!("unknown suffix ':{}'", suffix)));
        }

        let stripped_name = &name[..pos];
        if stripped_name.is_empty() {
            return Err(malformed(token, "empty name"));
        }

        // "Type:invert" carries the suffix on the type as well.
        let type_name = if parsed.has_explicit_name() {
            parsed.type_name().to_string()
        } else {
            stripped_name.to_string()
        };

        Ok(Self {
            type_name: TypeNameString::new(type_name, stripped_name),
            invert: true,
        })
    }
}

impl std::fmt::Display for MemberToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.type_name)?;
        if self.invert {
            f.write_str(":invert")?;
        }
        Ok(())
    }
}

/// Position of the first single `:` in `name`, skipping `::` pairs.
fn invert_separator(name: &str) -> Option<usize> {
    let bytes = name.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b':' {
            if i + 1 < bytes.len() && bytes[i + 1] == b':' {
                i += 2;
                continue;
            }
            return Some(i);
        }
        i += 1;
    }
    None
}

fn malformed(token: &str, reason: &str) -> CoreError {
    CoreError::MalformedToken {
        token: token.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_and_name() {
        let t = TypeNameString::parse("Prescaler/Pre1").unwrap();
        assert_eq!(t.type_name(), "Prescaler");
        assert_eq!(t.name(), "Pre1");
        assert_eq!(t.to_string(), "Prescaler/Pre1");
    }

    #[test]
    fn test_bare_name_is_its_own_type() {
        let t = TypeNameString::parse("Producer").unwrap();
        assert_eq!(t.type_name(), "Producer");
        assert_eq!(t.name(), "Producer");
        assert_eq!(t.to_string(), "Producer");
    }

    #[test]
    fn test_invert_suffix() {
        let m = MemberToken::parse("Prescaler/Pre1:invert").unwrap();
        assert!(m.invert);
        assert_eq!(m.type_name.type_name(), "Prescaler");
        assert_eq!(m.type_name.name(), "Pre1");
        assert_eq!(m.to_string(), "Prescaler/Pre1:invert");
    }

    #[test]
    fn test_invert_on_bare_type() {
        let m = MemberToken::parse("Prescaler:invert").unwrap();
        assert!(m.invert);
        assert_eq!(m.type_name.type_name(), "Prescaler");
        assert_eq!(m.type_name.name(), "Prescaler");
    }

    #[test]
    fn test_namespaces_are_not_invert() {
        let m = MemberToken::parse("ns::Filter/ns::Sel").unwrap();
        assert!(!m.invert);
        assert_eq!(m.type_name.type_name(), "ns::Filter");
        assert_eq!(m.type_name.name(), "ns::Sel");

        let m = MemberToken::parse("ns::Filter/a::b::Sel:invert").unwrap();
        assert!(m.invert);
        assert_eq!(m.type_name.name(), "a::b::Sel");

        let m = MemberToken::parse("a::b::Sel").unwrap();
        assert!(!m.invert);
        assert_eq!(m.type_name.type_name(), "a::b::Sel");
    }

    #[test]
    fn test_malformed_tokens() {
        for bad in ["", "   ", "/Name", "Type/", "A/B/C", "Type/Name:negate", "Type/:invert", "Name:"] {
            assert!(
                matches!(MemberToken::parse(bad), Err(CoreError::MalformedToken { .. })),
                "expected '{}' to be rejected",
                bad
            );
        }
    }
}
