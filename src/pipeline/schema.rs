//! Row layouts and schema derivation.

use crate::pipeline::error::SchemaError;
use crate::pipeline::row::ValueType;
use serde::{Deserialize, Serialize};

/// Descriptor of one field in a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMeta {
    pub name: String,
    pub value_type: ValueType,
    #[serde(default)]
    pub length: Option<u32>,
    #[serde(default)]
    pub precision: Option<u32>,
    /// Name of the step that introduced the field.
    #[serde(default)]
    pub origin: String,
}

impl FieldMeta {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            length: None,
            precision: None,
            origin: String::new(),
        }
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }
}

/// One change a step makes to the layout it receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FieldEdit {
    /// Append a field at the end.
    Add { field: FieldMeta },
    Remove { name: String },
    Rename { from: String, to: String },
    Retype {
        name: String,
        value_type: ValueType,
        #[serde(default)]
        length: Option<u32>,
        #[serde(default)]
        precision: Option<u32>,
    },
}

impl FieldEdit {
    pub fn add(field: FieldMeta) -> Self {
        FieldEdit::Add { field }
    }

    pub fn remove(name: impl Into<String>) -> Self {
        FieldEdit::Remove { name: name.into() }
    }

    pub fn rename(from: impl Into<String>, to: impl Into<String>) -> Self {
        FieldEdit::Rename {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn retype(name: impl Into<String>, value_type: ValueType) -> Self {
        FieldEdit::Retype {
            name: name.into(),
            value_type,
            length: None,
            precision: None,
        }
    }
}

/// Ordered field descriptors with case-insensitively unique names.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<FieldMeta>,
}

impl Schema {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(fields: Vec<FieldMeta>) -> Result<Self, SchemaError> {
        let mut schema = Schema::empty();
        for field in fields {
            schema.push(field)?;
        }
        Ok(schema)
    }

    pub fn fields(&self) -> &[FieldMeta] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, index: usize) -> Option<&FieldMeta> {
        self.fields.get(index)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Position of a field by case-insensitive name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| same_name(&f.name, name))
    }

    pub fn field_by_name(&self, name: &str) -> Option<&FieldMeta> {
        self.index_of(name).map(|i| &self.fields[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    /// Apply `edits` in order to a copy of this schema.
    pub fn derive(&self, edits: &[FieldEdit]) -> Result<Schema, SchemaError> {
        let mut schema = self.clone();
        for edit in edits {
            schema.apply(edit)?;
        }
        Ok(schema)
    }

    /// Like [`Schema::derive`], stamping `origin` on added fields that have none.
    pub fn derive_for_step(&self, edits: &[FieldEdit], origin: &str) -> Result<Schema, SchemaError> {
        let mut schema = self.clone();
        for edit in edits {
            match edit {
                FieldEdit::Add { field } if field.origin.is_empty() => {
                    schema.push(field.clone().with_origin(origin))?;
                }
                _ => schema.apply(edit)?,
            }
        }
        Ok(schema)
    }

    /// This schema's fields followed by `other`'s.
    pub fn merge(&self, other: &Schema) -> Result<Schema, SchemaError> {
        let mut schema = self.clone();
        for field in &other.fields {
            schema.push(field.clone())?;
        }
        Ok(schema)
    }

    fn push(&mut self, field: FieldMeta) -> Result<(), SchemaError> {
        if self.contains(&field.name) {
            return Err(SchemaError::DuplicateField(field.name));
        }
        self.fields.push(field);
        Ok(())
    }

    fn require(&self, name: &str) -> Result<usize, SchemaError> {
        self.index_of(name)
            .ok_or_else(|| SchemaError::UnknownField(name.to_string()))
    }

    fn apply(&mut self, edit: &FieldEdit) -> Result<(), SchemaError> {
        match edit {
            FieldEdit::Add { field } => self.push(field.clone()),
            FieldEdit::Remove { name } => {
                let index = self.require(name)?;
                self.fields.remove(index);
                Ok(())
            }
            FieldEdit::Rename { from, to } => {
                let index = self.require(from)?;
                if let Some(existing) = self.index_of(to) {
                    if existing != index {
                        return Err(SchemaError::DuplicateField(to.clone()));
                    }
                }
                self.fields[index].name = to.clone();
                Ok(())
            }
            FieldEdit::Retype {
                name,
                value_type,
                length,
                precision,
            } => {
                let index = self.require(name)?;
                let field = &mut self.fields[index];
                field.value_type = *value_type;
                field.length = *length;
                field.precision = *precision;
                Ok(())
            }
        }
    }
}

/// Field names compare equal ignoring case, in any alphabet.
pub fn same_name(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}
