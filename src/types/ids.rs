use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generated identifiers for records the stores own
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

/// Author-chosen identifiers inside a definition
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
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

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

uuid_id!(
    /// Identifier of a process definition
    ProcessDefinitionId
);
uuid_id!(
    /// Identifier of a running document instance
    InstanceId
);
uuid_id!(FormDefinitionId);
uuid_id!(ProjectId);
uuid_id!(CatalogId);
uuid_id!(SubmissionId);

string_id!(
    /// Node identifier, unique within one process definition
    NodeId
);
string_id!(EdgeId);
string_id!(
    /// Stable system name of an edge, used for logging and explicit transition choice
    EdgeKey
);
string_id!(RoleId);
string_id!(
    /// Stable key a node or edge uses to reference a project validator
    ValidatorKey
);

impl ValidatorKey {
    /// Derive a key from a display name.
    ///
    /// ASCII alphanumerics are lowercased and kept, every other run of
    /// characters collapses into a single `_`, and the result is trimmed of
    /// leading and trailing underscores.
    pub fn slugify(name: &str) -> Self {
        let mut slug = String::with_capacity(name.len());
        let mut pending_sep = false;
        for ch in name.chars() {
            if ch.is_ascii_alphanumeric() {
                if pending_sep && !slug.is_empty() {
                    slug.push('_');
                }
                pending_sep = false;
                slug.push(ch.to_ascii_lowercase());
            } else {
                pending_sep = true;
            }
        }
        Self(slug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_collapses_separators() {
        assert_eq!(ValidatorKey::slugify("Hide Salary").as_str(), "hide_salary");
        assert_eq!(
            ValidatorKey::slugify("  Manager -- only!! ").as_str(),
            "manager_only"
        );
        assert_eq!(ValidatorKey::slugify("step2Access").as_str(), "step2access");
    }

    #[test]
    fn test_slugify_drops_non_ascii() {
        assert_eq!(ValidatorKey::slugify("Доступ к шагу").as_str(), "");
        assert_eq!(ValidatorKey::slugify("Шаг 2 check").as_str(), "2_check");
    }

    #[test]
    fn test_string_ids_serialize_transparently() {
        let id = NodeId::new("review");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"review\"");
        let back: NodeId = serde_json::from_str("\"review\"").unwrap();
        assert_eq!(back, id);
    }
}
