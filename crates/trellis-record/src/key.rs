use std::fmt;

use serde::{Deserialize, Serialize};
use trellis_proto::{ColumnParent, ColumnPath};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Coordinate of a row (or a super column inside a row).
///
/// Keys are values: deriving a new key copies the parent's fields at that
/// moment, and later changes to the parent are not seen by the copy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    keyspace: String,
    column_family: String,
    row_key: String,
    super_column: Option<String>,
}

/// Fields to replace when deriving one key from another. `super_column` is
/// doubly optional so a derivation can clear it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyOverrides {
    pub keyspace: Option<String>,
    pub column_family: Option<String>,
    pub row_key: Option<String>,
    pub super_column: Option<Option<String>>,
}

impl Key {
    /// A key for a fresh row with a random row key.
    pub fn new(keyspace: impl Into<String>, column_family: impl Into<String>) -> Result<Self> {
        Self::for_row(keyspace, column_family, Self::generate_row_key())
    }

    pub fn for_row(
        keyspace: impl Into<String>,
        column_family: impl Into<String>,
        row_key: impl Into<String>,
    ) -> Result<Self> {
        let key = Self {
            keyspace: keyspace.into(),
            column_family: column_family.into(),
            row_key: row_key.into(),
            super_column: None,
        };
        key.validate()?;
        Ok(key)
    }

    pub fn compound(
        keyspace: impl Into<String>,
        column_family: impl Into<String>,
        row_key: impl Into<String>,
        super_column: impl Into<String>,
    ) -> Result<Self> {
        let mut key = Self::for_row(keyspace, column_family, row_key)?;
        key.super_column = Some(super_column.into());
        Ok(key)
    }

    pub fn generate_row_key() -> String {
        Uuid::new_v4().simple().to_string()
    }

    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    pub fn column_family(&self) -> &str {
        &self.column_family
    }

    pub fn row_key(&self) -> &str {
        &self.row_key
    }

    pub fn super_column(&self) -> Option<&str> {
        self.super_column.as_deref()
    }

    pub fn is_compound(&self) -> bool {
        self.super_column.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if self.keyspace.is_empty() {
            return Err(Error::IncompleteKey("keyspace is required"));
        }
        if self.column_family.is_empty() {
            return Err(Error::IncompleteKey("column family is required"));
        }
        Ok(())
    }

    pub fn derive(&self, overrides: KeyOverrides) -> Result<Key> {
        let key = Key {
            keyspace: overrides.keyspace.unwrap_or_else(|| self.keyspace.clone()),
            column_family: overrides
                .column_family
                .unwrap_or_else(|| self.column_family.clone()),
            row_key: overrides.row_key.unwrap_or_else(|| self.row_key.clone()),
            super_column: overrides
                .super_column
                .unwrap_or_else(|| self.super_column.clone()),
        };
        key.validate()?;
        Ok(key)
    }

    pub fn with_row_key(&self, row_key: impl Into<String>) -> Key {
        Key {
            row_key: row_key.into(),
            ..self.clone()
        }
    }

    pub fn with_super_column(&self, super_column: Option<String>) -> Key {
        Key {
            super_column,
            ..self.clone()
        }
    }

    pub fn with_column_family(&self, column_family: impl Into<String>) -> Result<Key> {
        self.derive(KeyOverrides {
            column_family: Some(column_family.into()),
            ..KeyOverrides::default()
        })
    }

    /// Path to `column` in this row, or to the row (or super column) itself.
    pub fn path_for(&self, column: Option<&str>) -> ColumnPath {
        ColumnPath {
            column_family: self.column_family.clone(),
            super_column: self.super_column.clone(),
            column: column.map(str::to_string),
        }
    }

    pub fn parent(&self) -> ColumnParent {
        ColumnParent {
            column_family: self.column_family.clone(),
            super_column: self.super_column.clone(),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.keyspace, self.column_family, self.row_key)?;
        if let Some(sc) = &self.super_column {
            write!(f, "/{sc}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_row_keys_are_unique_hex() {
        let a = Key::new("Keyspace1", "Users").unwrap();
        let b = Key::new("Keyspace1", "Users").unwrap();
        assert_ne!(a.row_key(), b.row_key());
        assert_eq!(a.row_key().len(), 32);
        assert!(a.row_key().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn requires_keyspace_and_column_family() {
        assert!(matches!(Key::for_row("", "Users", "r"), Err(Error::IncompleteKey(_))));
        assert!(matches!(Key::for_row("Keyspace1", "", "r"), Err(Error::IncompleteKey(_))));
        let key = Key::for_row("Keyspace1", "Users", "r").unwrap();
        assert!(key.with_column_family("").is_err());
    }

    #[test]
    fn derived_key_is_a_snapshot() {
        let parent = Key::for_row("Keyspace1", "Users", "alice").unwrap();
        let child = parent.with_row_key("bob");
        assert_eq!(child.row_key(), "bob");
        assert_eq!(child.keyspace(), "Keyspace1");
        assert_eq!(child.column_family(), "Users");

        let parent = parent.with_row_key("carol");
        assert_eq!(child.row_key(), "bob");
        assert_eq!(parent.row_key(), "carol");
    }

    #[test]
    fn derive_can_clear_super_column() {
        let key = Key::compound("Keyspace1", "Super1", "row", "sc").unwrap();
        assert!(key.is_compound());
        let flat = key
            .derive(KeyOverrides {
                super_column: Some(None),
                ..KeyOverrides::default()
            })
            .unwrap();
        assert!(!flat.is_compound());
        assert_eq!(flat.row_key(), "row");
    }

    #[test]
    fn paths() {
        let key = Key::compound("Keyspace1", "Super1", "row", "sc").unwrap();
        let path = key.path_for(Some("col"));
        assert_eq!(path.column_family, "Super1");
        assert_eq!(path.super_column.as_deref(), Some("sc"));
        assert_eq!(path.column.as_deref(), Some("col"));
        assert_eq!(key.path_for(None).column, None);
        assert_eq!(key.parent().super_column.as_deref(), Some("sc"));
        assert_eq!(key.to_string(), "Keyspace1/Super1/row/sc");
    }

    #[test]
    fn serializes_with_field_names() {
        let key = Key::compound("Keyspace1", "Users", "alice", "home").unwrap();
        let json = serde_json::to_value(&key).unwrap();
        assert_eq!(json["column_family"], "Users");
        assert_eq!(json["super_column"], "home");
        let back: Key = serde_json::from_value(json).unwrap();
        assert_eq!(back, key);
    }
}
