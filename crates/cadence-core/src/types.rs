use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifies one scheduler process among the instances sharing a job store
/// (UUIDv7, time-sortable for easier log correlation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for InstanceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_distinct() {
        assert_ne!(InstanceId::new(), InstanceId::new());
    }

    #[test]
    fn display_matches_inner_string() {
        let id = InstanceId::from("node-a");
        assert_eq!(id.to_string(), "node-a");
        assert_eq!(id.as_str(), "node-a");
    }
}
