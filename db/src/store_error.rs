//! Classification of store failures.
//!
//! Issuance retries only when a generated key collides with an existing one, so
//! callers need to tell a unique-constraint violation apart from every other
//! failure without depending on a particular backend's error codes.

use sea_orm::{DbErr, SqlErr};

/// A uniquely constrained column, identified the way backends name it in
/// violation messages: `table.column` (SQLite) or the `idx_<table>_<column>`
/// index (Postgres).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniqueColumn {
    pub table: &'static str,
    pub column: &'static str,
}

impl UniqueColumn {
    pub const fn new(table: &'static str, column: &'static str) -> Self {
        Self { table, column }
    }

    /// Whether a single identifier from an error message names this column.
    fn is_named_by(&self, ident: &str) -> bool {
        if ident.split_once('.') == Some((self.table, self.column)) {
            return true;
        }
        ident
            .strip_prefix("idx_")
            .and_then(|rest| rest.strip_prefix(self.table))
            .and_then(|rest| rest.strip_prefix('_'))
            == Some(self.column)
    }
}

/// Coarse class of a store error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreErrorClass {
    /// A unique constraint rejected the write; carries the backend message,
    /// which names the offending column or index.
    UniqueViolation(String),
    Other,
}

impl StoreErrorClass {
    /// Whether this is a unique violation raised by `target`. Identifiers in
    /// the message must match exactly, so `old_qr_code_key` never passes for
    /// `qr_code_key`.
    pub fn is_unique_violation_on(&self, target: UniqueColumn) -> bool {
        match self {
            StoreErrorClass::UniqueViolation(message) => message
                .split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.'))
                .any(|ident| target.is_named_by(ident)),
            StoreErrorClass::Other => false,
        }
    }
}

pub trait ClassifyError {
    fn classify(&self) -> StoreErrorClass;
}

impl ClassifyError for DbErr {
    fn classify(&self) -> StoreErrorClass {
        match self.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(message)) => {
                StoreErrorClass::UniqueViolation(message)
            }
            _ => StoreErrorClass::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: UniqueColumn = UniqueColumn::new("attendances", "qr_code_key");

    fn violation(message: &str) -> StoreErrorClass {
        StoreErrorClass::UniqueViolation(message.into())
    }

    #[test]
    fn non_sql_errors_are_other() {
        let err = DbErr::Custom("boom".into());
        assert_eq!(err.classify(), StoreErrorClass::Other);
        assert!(!err.classify().is_unique_violation_on(KEY));
    }

    #[test]
    fn sqlite_message_matches_qualified_column() {
        assert!(violation("UNIQUE constraint failed: attendances.qr_code_key").is_unique_violation_on(KEY));
        assert!(
            !violation("UNIQUE constraint failed: attendances.completion_id")
                .is_unique_violation_on(KEY)
        );
    }

    #[test]
    fn postgres_message_matches_index_name() {
        assert!(
            violation(r#"duplicate key value violates unique constraint "idx_attendances_qr_code_key""#)
                .is_unique_violation_on(KEY)
        );
    }

    #[test]
    fn similarly_named_columns_do_not_match() {
        assert!(
            !violation("UNIQUE constraint failed: attendances.old_qr_code_key")
                .is_unique_violation_on(KEY)
        );
        assert!(
            !violation("UNIQUE constraint failed: old_attendances.qr_code_key")
                .is_unique_violation_on(KEY)
        );
        assert!(
            !violation(r#"duplicate key value violates unique constraint "idx_attendances_qr_code_key_old""#)
                .is_unique_violation_on(KEY)
        );
    }

    #[test]
    fn composite_violation_lists_each_column() {
        assert!(
            violation("UNIQUE constraint failed: attendances.user_id, attendances.qr_code_key")
                .is_unique_violation_on(KEY)
        );
    }
}
