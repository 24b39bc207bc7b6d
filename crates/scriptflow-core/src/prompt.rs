use crate::error::{FlowError, Result};
use crate::models;
use crate::pipeline;
use crate::types::StepNumber;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

pub const MAX_PROMPT_CHARS: usize = 50_000;

// ---------------------------------------------------------------------------
// Prompt
// ---------------------------------------------------------------------------

/// A versioned prompt configuration for one pipeline step. Exactly one row per
/// step number is active; older versions are kept with `is_active = false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub id: String,
    pub name: String,
    pub step_number: StepNumber,
    pub system_prompt_text: String,
    pub user_prompt_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
    pub version: u32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Prompt {
    /// Version 1 of the prompt used when a datastore is seeded.
    pub fn seed(step: StepNumber) -> Self {
        let spec = pipeline::spec(step);
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: format!("{} Prompt", spec.name),
            step_number: step,
            system_prompt_text: format!(
                "You are an assistant producing the {} stage of a YouTube script.",
                spec.name.to_lowercase()
            ),
            user_prompt_text: format!(
                "Perform the {} step for the provided project and return the {} result.",
                spec.name.to_lowercase(),
                spec.result_key
            ),
            model_provider: Some(models::provider_of(spec.default_model).to_string()),
            model_name: Some(spec.default_model.to_string()),
            parameters: Some(serde_json::json!({ "temperature": 0.7 })),
            version: 1,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build the row that supersedes this one. The caller is responsible for
    /// deactivating `self` in the same atomic operation.
    pub fn next_version(&self, edit: &PromptEdit) -> Result<Prompt> {
        edit.validate()?;
        let now = Utc::now();
        Ok(Prompt {
            id: Uuid::new_v4().to_string(),
            name: self.name.clone(),
            step_number: self.step_number,
            system_prompt_text: edit
                .system_prompt_text
                .clone()
                .unwrap_or_else(|| self.system_prompt_text.clone()),
            user_prompt_text: edit.user_prompt_text.trim().to_string(),
            model_provider: edit
                .model_provider
                .clone()
                .or_else(|| self.model_provider.clone()),
            model_name: edit.model_name.clone().or_else(|| self.model_name.clone()),
            parameters: edit.parameters.clone().or_else(|| self.parameters.clone()),
            version: self.version + 1,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Reject empty and oversized prompt text before anything touches the network.
pub fn validate_prompt_text(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(FlowError::Validation("Prompt text cannot be empty".into()));
    }
    if text.chars().count() > MAX_PROMPT_CHARS {
        return Err(FlowError::Validation(
            "Prompt text cannot exceed 50,000 characters".into(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// PromptEdit
// ---------------------------------------------------------------------------

/// A new version's content. Fields left `None` carry over from the active
/// version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptEdit {
    pub user_prompt_text: String,
    #[serde(default)]
    pub system_prompt_text: Option<String>,
    #[serde(default)]
    pub model_provider: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
}

impl PromptEdit {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            user_prompt_text: text.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_prompt_text(&self.user_prompt_text)?;
        if let Some(system) = &self.system_prompt_text {
            validate_prompt_text(system)?;
        }
        Ok(())
    }
}

/// Apply a new version to the full row set of a prompt table: deactivate the
/// step's current rows and append the successor. Stores call this inside a
/// single write transaction.
pub fn apply_new_version(
    rows: &mut Vec<Prompt>,
    step: StepNumber,
    edit: &PromptEdit,
) -> Result<Prompt> {
    let active = rows
        .iter()
        .filter(|p| p.step_number == step && p.is_active)
        .max_by_key(|p| p.version)
        .ok_or(FlowError::PromptNotFound(step.get()))?;
    let next = active.next_version(edit)?;

    let now = Utc::now();
    for row in rows.iter_mut().filter(|p| p.step_number == step && p.is_active) {
        row.is_active = false;
        row.updated_at = now;
    }
    rows.push(next.clone());
    Ok(next)
}

// ---------------------------------------------------------------------------
// Sorting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptSortField {
    #[default]
    StepNumber,
    /// Names follow step order, so this sorts by step number.
    Name,
    Version,
    UpdatedAt,
}

impl std::str::FromStr for PromptSortField {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "step_number" | "step" => Ok(Self::StepNumber),
            "name" => Ok(Self::Name),
            "version" => Ok(Self::Version),
            "updated_at" | "updated" => Ok(Self::UpdatedAt),
            _ => Err(FlowError::Validation(format!("unknown sort field: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PromptSort {
    pub field: PromptSortField,
    pub descending: bool,
}

impl PromptSort {
    pub fn apply(&self, prompts: &mut [Prompt]) {
        prompts.sort_by(|a, b| {
            let ord = match self.field {
                PromptSortField::StepNumber | PromptSortField::Name => {
                    a.step_number.cmp(&b.step_number)
                }
                PromptSortField::Version => a.version.cmp(&b.version),
                PromptSortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            };
            let ord = if ord == Ordering::Equal {
                a.step_number.cmp(&b.step_number)
            } else {
                ord
            };
            if self.descending {
                ord.reverse()
            } else {
                ord
            }
        });
    }

    /// Column name used by PostgREST `order=` parameters.
    pub fn column(&self) -> &'static str {
        match self.field {
            PromptSortField::StepNumber | PromptSortField::Name => "step_number",
            PromptSortField::Version => "version",
            PromptSortField::UpdatedAt => "updated_at",
        }
    }
}
