//! Client-side query cache.
//!
//! Views read through a [`QueryCache`] by [`QueryKey`]; writes go through
//! [`QueryCache::mutate`], which invalidates the key families the write
//! declares and re-fetches the ones that are mounted. [`ResourceHandle`]
//! derives those declarations from the resource table, so screens never
//! refresh each other by hand.

mod cache;
mod key;
mod mutation;
mod reservations;
mod resources;
mod subscription;
mod transport;

pub use cache::{CacheConfig, Freshness, QueryCache, QueryState};
pub use key::{Filter, KeyVariant, QueryKey};
pub use mutation::Mutation;
pub use reservations::{ConflictRequest, ReservationsClient};
pub use resources::{ResourceHandle, cascade_keys, related_keys};
pub use subscription::Subscription;
pub use transport::{LocalTransport, Method, RequestError, Transport, TransportResponse, call, into_result};
