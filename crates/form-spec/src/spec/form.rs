use std::collections::{BTreeMap, BTreeSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::path::{FieldPath, PathError};
use crate::spec::field::{DEFAULT_TAB, FieldSpec};
use crate::spec::page::{PageSpec, TabSpec};
use crate::spec::validation::CrossFieldValidation;

/// Addressing scheme used to split fields across screens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutMode {
    Pages,
    Tabs,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpecError {
    #[error("form '{form}' has no fields")]
    NoFields { form: String },
    #[error("field name '{0}' is used more than once")]
    DuplicateField(String),
    #[error("field '{field}' has an invalid name: {source}")]
    InvalidName {
        field: String,
        #[source]
        source: PathError,
    },
    #[error("'{owner}' depends on unknown field '{dependency}'")]
    UnknownDependency { owner: String, dependency: String },
    #[error("validation '{rule}' references unknown field '{field}'")]
    UnknownValidationField { rule: String, field: String },
    #[error("field '{field}' uses undeclared tab '{tab}'")]
    UnknownTab { field: String, tab: String },
    #[error("page {0} must be 1 or greater")]
    InvalidPage(u32),
}

/// Top-level form definition supplied by a calculator page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FormSpec {
    pub id: String,
    pub title: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub fields: Vec<FieldSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pages: Vec<PageSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tabs: Vec<TabSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validations: Vec<CrossFieldValidation>,
}

impl FormSpec {
    pub fn new(id: impl Into<String>, title: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            version: "1.0.0".into(),
            description: None,
            fields,
            pages: Vec::new(),
            tabs: Vec::new(),
            validations: Vec::new(),
        }
    }

    pub fn layout(&self) -> LayoutMode {
        if self.tabs.is_empty() {
            LayoutMode::Pages
        } else {
            LayoutMode::Tabs
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn page_spec(&self, number: u32) -> Option<&PageSpec> {
        self.pages.iter().find(|page| page.number == number)
    }

    pub fn tab_spec(&self, id: &str) -> Option<&TabSpec> {
        self.tabs.iter().find(|tab| tab.id == id)
    }

    /// Every page number that holds a field or has a page entry, ascending.
    pub fn page_numbers(&self) -> Vec<u32> {
        let numbers: BTreeSet<u32> = self
            .fields
            .iter()
            .map(|field| field.page)
            .chain(self.pages.iter().map(|page| page.number))
            .collect();
        numbers.into_iter().collect()
    }

    /// Tab ids in declaration order; a single default tab when none are declared.
    pub fn tab_ids(&self) -> Vec<String> {
        if self.tabs.is_empty() {
            vec![DEFAULT_TAB.to_string()]
        } else {
            self.tabs.iter().map(|tab| tab.id.clone()).collect()
        }
    }

    /// Rejects specs the engine cannot run.
    pub fn check(&self) -> Result<(), SpecError> {
        if self.fields.is_empty() {
            return Err(SpecError::NoFields {
                form: self.id.clone(),
            });
        }

        let mut names = BTreeMap::new();
        for field in &self.fields {
            FieldPath::parse(&field.name).map_err(|source| SpecError::InvalidName {
                field: field.name.clone(),
                source,
            })?;
            if names.insert(field.name.as_str(), field).is_some() {
                return Err(SpecError::DuplicateField(field.name.clone()));
            }
            if field.page == 0 {
                return Err(SpecError::InvalidPage(0));
            }
        }

        for field in &self.fields {
            for dependency in field.effective_dependencies() {
                if !names.contains_key(dependency.as_str()) {
                    return Err(SpecError::UnknownDependency {
                        owner: field.name.clone(),
                        dependency,
                    });
                }
            }
        }

        for page in &self.pages {
            if page.number == 0 {
                return Err(SpecError::InvalidPage(0));
            }
            for dependency in &page.dependencies {
                if !names.contains_key(dependency.as_str()) {
                    return Err(SpecError::UnknownDependency {
                        owner: format!("page {}", page.number),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        for tab in &self.tabs {
            for dependency in &tab.dependencies {
                if !names.contains_key(dependency.as_str()) {
                    return Err(SpecError::UnknownDependency {
                        owner: format!("tab {}", tab.id),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        if !self.tabs.is_empty() {
            for field in &self.fields {
                if self.tab_spec(&field.tab).is_none() {
                    return Err(SpecError::UnknownTab {
                        field: field.name.clone(),
                        tab: field.tab.clone(),
                    });
                }
            }
        }

        for rule in &self.validations {
            for field in &rule.fields {
                if !names.contains_key(field.as_str()) {
                    return Err(SpecError::UnknownValidationField {
                        rule: rule.key(),
                        field: field.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}
