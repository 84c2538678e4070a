// ============================================================================
// Model Descriptors
// ============================================================================
//
// In-memory description of the declared entity model: an arena of entity
// types indexed by `TypeId`, where parents and reference targets are ids
// rather than nested objects, so hierarchy chains of any depth stay flat.
//
// ============================================================================

pub mod document;
pub mod entity;
pub mod field;
pub mod index;
#[allow(clippy::module_inception)]
pub mod model;

pub use document::ModelDocument;
pub use entity::{EntitySpec, EntityTypeDescriptor};
pub use field::{FieldDescriptor, FieldSpec, FieldType, TypeId};
pub use index::{IndexDescriptor, IndexSpec, default_index_name};
pub use model::{Model, ModelBuilder};
