pub mod catalog;
pub mod fulltext;
pub mod persistence;
pub mod store;
pub mod table;

pub use catalog::PartCatalog;
pub use fulltext::{FullTextCatalog, tokenize};
pub use persistence::StoreSnapshot;
pub use store::{Entity, PartState, Store};
pub use table::{IndexDef, StoredRow, Table, TableSchema, TypeEntry};
