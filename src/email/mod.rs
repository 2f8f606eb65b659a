pub mod dispatcher;
pub mod templates;

pub use dispatcher::{EmailDispatcher, OutboundEmail};
