//! Form definitions bound to step nodes, and the catalogs their select
//! fields draw options from

use crate::types::{CatalogId, FormDefinitionId, RoleId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Date,
    Datetime,
    Boolean,
    Select,
    Multiselect,
    Textarea,
}

/// Effective access a role has to one field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    Hidden,
}

impl Permission {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            "hidden" => Some(Self::Hidden),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Hidden => "hidden",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grants a permission by role membership or by a condition on the data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldAccessRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_id: Option<RoleId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    pub permission: Permission,
}

impl FieldAccessRule {
    pub fn for_role(role_id: impl Into<String>, permission: Permission) -> Self {
        Self {
            role_id: Some(RoleId::new(role_id)),
            expression: None,
            permission,
        }
    }

    pub fn when(expression: impl Into<String>, permission: Permission) -> Self {
        Self {
            role_id: None,
            expression: Some(expression.into()),
            permission,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

impl SelectOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(default)]
    pub label: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<SelectOption>>,
    /// When set, options come from this catalog instead of `options`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_id: Option<CatalogId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validations: Option<Map<String, Value>>,
    #[serde(default)]
    pub access_rules: Vec<FieldAccessRule>,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            field_type,
            required: false,
            options: None,
            catalog_id: None,
            validations: None,
            access_rules: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: FieldAccessRule) -> Self {
        self.access_rules.push(rule);
        self
    }

    pub fn with_catalog(mut self, catalog_id: CatalogId) -> Self {
        self.catalog_id = Some(catalog_id);
        self
    }

    pub fn with_options(mut self, options: Vec<SelectOption>) -> Self {
        self.options = Some(options);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormDefinition {
    pub id: FormDefinitionId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

impl FormDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: FormDefinitionId::generate(),
            name: name.into(),
            description: String::new(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub id: CatalogId,
    pub name: String,
    #[serde(default)]
    pub items: Vec<SelectOption>,
}

impl Catalog {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: CatalogId::generate(),
            name: name.into(),
            items: Vec::new(),
        }
    }

    pub fn with_item(mut self, value: impl Into<String>, label: impl Into<String>) -> Self {
        self.items.push(SelectOption::new(value, label));
        self
    }
}
