mod bundle;
mod engine;

pub use bundle::BundleStore;
pub use engine::run_archival;
