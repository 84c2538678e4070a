pub mod error;
pub mod types;
pub mod value;

pub use error::{DbError, ModelViolation, RenameCandidate, Result, VerificationFailure};
pub use types::{ColumnDef, DISCRIMINATOR_COLUMN, Row, RowKey, quote_ident, sql_literal};
pub use value::{DataType, Value};
