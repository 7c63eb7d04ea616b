pub mod recorder;
pub mod schema;

pub use recorder::{MigrationRecorder, MigrationStore};
