//! Projects group processes and own the validator scripts nodes and edges
//! refer to by key

use crate::types::{ProjectId, ValidatorKey};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorKind {
    /// Decides which form fields are hidden, read-only or writable
    FieldVisibility,
    /// Decides whether a transition to a target node is allowed
    StepAccess,
}

impl ValidatorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FieldVisibility => "field_visibility",
            Self::StepAccess => "step_access",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Validator {
    pub key: ValidatorKey,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ValidatorKind,
    pub code: String,
}

/// Wire shape: `key` may be omitted and is then derived from `name`
#[derive(Deserialize)]
struct RawValidator {
    #[serde(default)]
    key: Option<String>,
    name: String,
    #[serde(rename = "type", default = "default_kind")]
    kind: ValidatorKind,
    #[serde(default)]
    code: String,
}

fn default_kind() -> ValidatorKind {
    ValidatorKind::FieldVisibility
}

impl<'de> Deserialize<'de> for Validator {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawValidator::deserialize(deserializer)?;
        Ok(Validator::with_key(raw.key.as_deref(), raw.name, raw.kind, raw.code))
    }
}

impl Validator {
    /// Validator keyed by its slugified name
    pub fn new(name: impl Into<String>, kind: ValidatorKind, code: impl Into<String>) -> Self {
        Self::with_key(None, name, kind, code)
    }

    /// Validator with an explicit key; blank keys fall back to the slugified name
    pub fn with_key(
        key: Option<&str>,
        name: impl Into<String>,
        kind: ValidatorKind,
        code: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let key = match key.map(str::trim) {
            Some(k) if !k.is_empty() => ValidatorKey::new(k),
            _ => ValidatorKey::slugify(&name),
        };
        Self {
            key,
            name,
            kind,
            code: code.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    #[serde(default)]
    pub validators: Vec<Validator>,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ProjectId::generate(),
            name: name.into(),
            validators: Vec::new(),
        }
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    /// Validators of `kind` referenced by `keys`, in project order
    pub fn select_validators<'a>(
        &'a self,
        keys: &'a [ValidatorKey],
        kind: ValidatorKind,
    ) -> impl Iterator<Item = &'a Validator> + 'a {
        self.validators
            .iter()
            .filter(move |v| v.kind == kind && keys.contains(&v.key))
    }
}
