//! Wire types shared by the polyglot server, its clients and the test suite.

pub mod api;
pub mod ids;
pub mod messages;

pub use api::*;
pub use ids::*;
pub use messages::*;
