//! Service layer
//!
//! Cache-aside access to records: the accessor handles id-keyed CRUD,
//! the link resolver adds lookups by any indexed field value.

mod accessor;
mod link;

pub use accessor::RecordAccessor;
pub use link::{LINK_TTL, LinkFinder, LinkRegistry};
