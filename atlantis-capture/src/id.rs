use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable key shared by every lifecycle event of one request or connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(String);

impl PackageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for PackageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PackageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PackageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<Uuid> for PackageId {
    fn from(value: Uuid) -> Self {
        Self(value.to_string().to_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::PackageId;

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(PackageId::new(), PackageId::new());
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = PackageId::from("r1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"r1\"");
        assert_eq!(id.to_string(), "r1");
    }
}
