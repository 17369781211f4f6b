//! Built-in step kinds.
//!
//! A kind is identified in topology files by its tag (`"generator"`,
//! `"select_values"`, ...). The registry maps tags to constructors.

use serde::{Deserialize, Serialize};

/// Types of built-in steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    // Sources
    /// Emits a fixed number of constant rows.
    Generator,

    // Transforms
    /// Passes rows through unchanged.
    Dummy,
    /// Keeps rows matching a comparison.
    Filter,
    /// Appends constant fields.
    Constants,
    /// Removes, renames and retypes fields.
    SelectValues,
    /// Evaluates a Rhai expression per row.
    Script,

    // Control
    /// Aborts the run after a number of rows.
    Abort,
}

impl StepKind {
    /// Tag used in topology files.
    pub fn tag(&self) -> &'static str {
        match self {
            StepKind::Generator => "generator",
            StepKind::Dummy => "dummy",
            StepKind::Filter => "filter",
            StepKind::Constants => "constants",
            StepKind::SelectValues => "select_values",
            StepKind::Script => "script",
            StepKind::Abort => "abort",
        }
    }

    pub fn from_tag(tag: &str) -> Option<StepKind> {
        Self::all().iter().copied().find(|kind| kind.tag() == tag)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            StepKind::Generator => "Generate Rows",
            StepKind::Dummy => "Dummy",
            StepKind::Filter => "Filter Rows",
            StepKind::Constants => "Add Constants",
            StepKind::SelectValues => "Select Values",
            StepKind::Script => "Script",
            StepKind::Abort => "Abort",
        }
    }

    pub fn all() -> &'static [StepKind] {
        &[
            StepKind::Generator,
            StepKind::Dummy,
            StepKind::Filter,
            StepKind::Constants,
            StepKind::SelectValues,
            StepKind::Script,
            StepKind::Abort,
        ]
    }

    /// Sources produce rows without reading any input.
    pub fn is_source(&self) -> bool {
        matches!(self, StepKind::Generator)
    }

    pub fn description(&self) -> &'static str {
        match self {
            StepKind::Generator => {
                "Emits `limit` rows built from configured constant fields.\n\
                 An optional sequence field numbers the rows."
            }
            StepKind::Dummy => "Passes every row through unchanged.",
            StepKind::Filter => {
                "Keeps rows where `field <op> value` holds.\n\
                 Operators: =, <>, <, <=, >, >=, is_null, not_null."
            }
            StepKind::Constants => "Appends constant fields to every row.",
            StepKind::SelectValues => {
                "Removes, renames and retypes fields.\n\
                 Failed conversions are reported as row errors."
            }
            StepKind::Script => {
                "Evaluates a Rhai expression with the row's fields in scope.\n\
                 Writes the result to a new field, or filters on it."
            }
            StepKind::Abort => "Aborts the run once more than `threshold` rows arrive.",
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_round_trip() {
        for kind in StepKind::all() {
            assert_eq!(StepKind::from_tag(kind.tag()), Some(*kind));
        }
        assert_eq!(StepKind::from_tag("unknown"), None);
    }

    #[test]
    fn test_serde_uses_tag() {
        let json = serde_json::to_string(&StepKind::SelectValues).unwrap();
        assert_eq!(json, "\"select_values\"");
    }
}
