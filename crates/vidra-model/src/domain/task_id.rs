use std::{borrow::Borrow, fmt, sync::Arc};

use serde::{Deserialize, Serialize};

/// Opaque identifier of a supervised task.
///
/// Generated by the supervisor at start time and never reused.
/// Cloning is cheap: the string is shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Arc<str>);

impl TaskId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl Borrow<str> for TaskId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn lookup_by_str() {
        let mut map = HashMap::new();
        map.insert(TaskId::from("probe-1"), 1);
        assert_eq!(map.get("probe-1"), Some(&1));
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = TaskId::from("probe-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""probe-1""#);

        let back: TaskId = serde_json::from_str(r#""probe-1""#).unwrap();
        assert_eq!(back, id);
    }
}
