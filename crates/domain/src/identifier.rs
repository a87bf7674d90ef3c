use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use sunset_core::{AppError, AppResult};

const MAX_IDENTIFIER_PART_LENGTH: usize = 63;

/// Validated SQL identifier, optionally schema-qualified (`schema.table`).
///
/// Dataset names come from deployment configuration and are interpolated into
/// statements, so only plain `[A-Za-z_][A-Za-z0-9_]*` parts are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SqlIdentifier(String);

impl SqlIdentifier {
    /// Creates a validated identifier.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        let trimmed = value.trim();
        let parts: Vec<&str> = trimmed.split('.').collect();

        if parts.len() > 2 {
            return Err(AppError::Validation(format!(
                "identifier '{trimmed}' has more than one schema qualifier"
            )));
        }

        for part in &parts {
            validate_part(trimmed, part)?;
        }

        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the identifier as configured.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Returns the identifier double-quoted per part for statement interpolation.
    #[must_use]
    pub fn quoted(&self) -> String {
        self.0
            .split('.')
            .map(|part| format!("\"{part}\""))
            .collect::<Vec<_>>()
            .join(".")
    }
}

fn validate_part(identifier: &str, part: &str) -> AppResult<()> {
    let mut characters = part.chars();
    let Some(first) = characters.next() else {
        return Err(AppError::Validation(format!(
            "identifier '{identifier}' contains an empty part"
        )));
    };

    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(AppError::Validation(format!(
            "identifier '{identifier}' must start with a letter or underscore"
        )));
    }

    if !characters.all(|character| character.is_ascii_alphanumeric() || character == '_') {
        return Err(AppError::Validation(format!(
            "identifier '{identifier}' may only contain letters, digits, and underscores"
        )));
    }

    if part.len() > MAX_IDENTIFIER_PART_LENGTH {
        return Err(AppError::Validation(format!(
            "identifier '{identifier}' exceeds {MAX_IDENTIFIER_PART_LENGTH} characters"
        )));
    }

    Ok(())
}

impl TryFrom<String> for SqlIdentifier {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SqlIdentifier> for String {
    fn from(value: SqlIdentifier) -> Self {
        value.0
    }
}

impl Display for SqlIdentifier {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}
