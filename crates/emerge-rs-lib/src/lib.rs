pub mod error;
pub use error::Result;
pub use error::Error;

pub mod config;
pub use config::Config;

pub mod package;
pub use package::PackageRef;
pub use package::Specifier;
pub use package::Target;

pub mod catalog;
pub use catalog::PackageCatalog;
pub use catalog::PackageRecord;

pub mod overlay;
pub use overlay::PendingOverlay;

pub mod operation_tree;
pub use operation_tree::OperationTree;
pub use operation_tree::QueueKind;

pub mod executor;
pub use executor::SerializedExecutor;

pub mod progress;
pub use progress::ProgressTracker;

pub mod session;
pub use session::Session;
