pub mod dependencies;
pub mod pointer;
pub mod reconciler;
pub mod registry;
pub mod report;
pub mod scan;

pub use dependencies::{Dependency, DependencyDeclaration};
pub use pointer::{FilePointerStore, MemoryPointerStore, PointerRead, PointerStore};
pub use reconciler::{PendingMigration, Reconciler};
pub use registry::{AppRef, AppRegistry, DirectoryRegistry};
pub use report::{MigrationOutcome, Outcome, RunReport};
