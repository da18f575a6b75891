mod manager;
mod protection;
mod space;
#[cfg(test)]
mod tests;

pub use manager::{EvictionBudget, EvictionOutcome, Pressure, StorageManager};
#[cfg(feature = "person_detection")]
pub use protection::OnnxPersonGuard;
pub use protection::{build_guard, ContentGuard, NoProtection};
pub use space::{bytes_to_gb, SpaceProbe, StatvfsProbe};
