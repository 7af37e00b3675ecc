//! Form-field metadata
//!
//! Dry-run execution populates these so the UI can render an input form
//! before the user confirms a run.

use serde::{Deserialize, Serialize};

/// Widget kind for a form field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FormFieldType {
    #[default]
    Text,
    Selection,
    Group,
}

/// Kind of hint attached to a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HintType {
    Info,
    Warning,
    Error,
}

/// When the UI should re-validate a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ValidationTiming {
    #[default]
    Change,
    Confirm,
}

/// One input field of the inspection form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormField {
    pub id: String,
    #[serde(rename = "type")]
    pub field_type: FormFieldType,
    pub label: String,
    /// Fields render in descending priority
    pub priority: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint_type: Option<HintType>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub hint: String,
    pub readonly: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub default: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    pub validation_timing: ValidationTiming,
}

impl FormField {
    /// Text field with defaults
    #[must_use]
    pub fn text(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            field_type: FormFieldType::Text,
            label: label.into(),
            priority: 0,
            hint_type: None,
            hint: String::new(),
            readonly: false,
            default: String::new(),
            suggestions: Vec::new(),
            validation_timing: ValidationTiming::default(),
        }
    }

    /// Set the render priority
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the default value
    #[must_use]
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = default.into();
        self
    }

    /// Attach a hint
    #[must_use]
    pub fn with_hint(mut self, hint_type: HintType, hint: impl Into<String>) -> Self {
        self.hint_type = Some(hint_type);
        self.hint = hint.into();
        self
    }

    /// Attach completion suggestions
    #[must_use]
    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }
}

/// The set of form fields populated during dry-run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormFieldSet {
    fields: Vec<FormField>,
}

impl FormFieldSet {
    /// Empty set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the field with the same id
    pub fn upsert(&mut self, field: FormField) {
        match self.fields.iter_mut().find(|f| f.id == field.id) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
    }

    /// Fields in presentation order: descending priority, stable by id
    #[must_use]
    pub fn fields(&self) -> Vec<FormField> {
        let mut sorted = self.fields.clone();
        sorted.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        sorted
    }

    /// Field by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&FormField> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// Number of fields
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the set is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Raw form values entered by the user, keyed by field id
///
/// The UI places this in the inspection shared map before starting a run
/// (or a dry-run, to re-validate while the user types).
#[derive(Debug, Clone, Default)]
pub struct FormInput {
    values: std::collections::HashMap<String, String>,
}

impl FormInput {
    /// Empty input
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one field's raw value
    pub fn set(&mut self, id: impl Into<String>, value: impl Into<String>) {
        self.values.insert(id.into(), value.into());
    }

    /// Raw value for a field id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&str> {
        self.values.get(id).map(String::as_str)
    }
}

/// Shared-map key the [`FormInput`] lives under
pub static FORM_INPUT: crate::typedmap::TypedKey<FormInput> =
    crate::typedmap::TypedKey::new("khi/form-input");

/// Task resolving one form field to a typed parameter
///
/// In dry-run: upserts the field into the form metadata, validating the
/// current input and attaching an error hint when it does not parse; the
/// task then yields `fallback` so downstream dry-run tasks stay runnable.
/// In run mode: parses the input (or the field default) and returns the
/// resolved value; invalid input is a task failure.
#[must_use]
pub fn form_value_task<T>(
    reference: &'static str,
    field: FormField,
    parse: impl Fn(&str) -> Result<T, String> + Send + Sync + 'static,
    fallback: T,
) -> std::sync::Arc<crate::task::TaskDefinition>
where
    T: Clone + Send + Sync + 'static,
{
    use crate::metadata::FormFieldsMetadata;

    let id = crate::id::TaskId::new(reference);
    crate::task::TaskDefinition::new(
        id.clone(),
        vec![],
        crate::label::LabelSet::new(),
        move |ctx: crate::context::TaskContext| {
            let id = id.clone();
            let field = field.clone();
            let parsed = {
                let raw = ctx
                    .inspection()
                    .get(FORM_INPUT)
                    .and_then(|input| input.get(&field.id).map(str::to_string))
                    .unwrap_or_else(|| field.default.clone());
                parse(&raw).map_err(|hint| (raw, hint))
            };
            let fallback = fallback.clone();
            async move {
                match parsed {
                    Ok(value) => {
                        if ctx.is_dry_run() {
                            ctx.metadata().get_or_init::<FormFieldsMetadata>().upsert(field);
                        }
                        Ok(value)
                    }
                    Err((raw, hint)) => {
                        if ctx.is_dry_run() {
                            let mut invalid = field;
                            invalid.hint_type = Some(HintType::Error);
                            invalid.hint = hint;
                            ctx.metadata()
                                .get_or_init::<FormFieldsMetadata>()
                                .upsert(invalid);
                            return Ok(fallback);
                        }
                        Err(crate::task::TaskError::failed(
                            &id,
                            format!("invalid value '{raw}': {hint}"),
                        ))
                    }
                }
            }
        },
    )
}
