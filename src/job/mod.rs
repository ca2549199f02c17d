//! The repost job: persisted record, events, and the transition function.

pub mod machine;
pub mod schema;

pub use machine::{decide, Decision, Effect, Rejection, Transition, TRANSITIONS};
pub use schema::*;
