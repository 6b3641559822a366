mod message;
mod pill;

pub use message::{ResultItem, WorkItem};
pub(crate) use pill::Pill;
