//! Client-side query cache: keyed results with a freshness window, named
//! queries and mutations, and invalidation of dependent views.

mod client;
mod infinite;
pub mod key;
mod queries;

pub use client::{QueryClient, QueryStatus};
pub use infinite::InfiniteQuery;
pub use key::{KeyKind, KeyPattern, QueryKey};
pub use queries::Queries;
