use std::fmt;

use serde::{Deserialize, Serialize};

/// Access level a user or key holds on a repository. Ordered, so a higher
/// mode implies every lower one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    #[default]
    None,
    Read,
    Write,
    Admin,
    Owner,
}

impl AccessMode {
    /// Returns true if this mode grants at least `required`.
    #[must_use]
    pub fn has(self, required: AccessMode) -> bool {
        self >= required
    }

    pub fn parse(s: &str) -> Option<AccessMode> {
        match s {
            "none" => Some(Self::None),
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            "admin" => Some(Self::Admin),
            "owner" => Some(Self::Owner),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Read => "read",
            Self::Write => "write",
            Self::Admin => "admin",
            Self::Owner => "owner",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<i64> for AccessMode {
    fn from(v: i64) -> Self {
        match v {
            1 => Self::Read,
            2 => Self::Write,
            3 => Self::Admin,
            4 => Self::Owner,
            _ => Self::None,
        }
    }
}

impl From<AccessMode> for i64 {
    fn from(m: AccessMode) -> Self {
        m as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_mode_ordering() {
        assert!(AccessMode::Owner.has(AccessMode::Admin));
        assert!(AccessMode::Write.has(AccessMode::Read));
        assert!(!AccessMode::Read.has(AccessMode::Write));
    }

    #[test]
    fn test_access_mode_db_roundtrip() {
        for mode in [AccessMode::Read, AccessMode::Write, AccessMode::Admin] {
            assert_eq!(AccessMode::from(i64::from(mode)), mode);
        }
        assert_eq!(AccessMode::from(42), AccessMode::None);
        assert_eq!(AccessMode::parse("write"), Some(AccessMode::Write));
    }
}
