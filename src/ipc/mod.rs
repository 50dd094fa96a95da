mod error;
mod events;
mod handlers;
mod helpers;
mod router;
mod types;

pub use error::err;
pub use events::Outbox;
pub use router::handle_request;
pub use types::{AppState, Request};
