pub mod loader;
pub mod model;
pub mod validation;

pub use loader::ConfigLoader;
pub use model::{AlignConfig, AppErrorPolicy, CliOverrides, DatabaseConfig};
pub use validation::ConfigValidator;
