mod mirror;
mod repository;
mod schema;

pub use mirror::RegistryMirror;
pub use repository::{InsertOutcome, Repository};
