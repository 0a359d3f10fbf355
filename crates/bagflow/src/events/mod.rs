pub mod filter;
pub mod model;

pub use filter::{FilterConfig, NotificationFilter};
pub use model::{ActionableFile, EventRecord, StorageEvent};
