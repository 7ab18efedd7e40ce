pub mod cache;
pub mod document;
pub mod fetch;
pub mod inflight;
pub mod request;

pub use cache::*;
pub use document::*;
pub use fetch::*;
pub use inflight::*;
pub use request::*;
