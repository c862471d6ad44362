pub mod collection_ext;
pub mod scheduled_executor;

pub use collection_ext::unique_ordered;
pub use scheduled_executor::{ScheduledExecutor, ScheduledTask};
