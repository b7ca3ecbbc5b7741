pub mod client;
mod keys;
mod transport;

pub use client::HttpTransport;
pub use keys::CollectionQuery;
pub use transport::{ActionVerb, EnvToken, StaticToken, TokenSource, Transport};
