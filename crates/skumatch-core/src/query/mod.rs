//! Matching, claim resolution and the two write paths built on them.

pub mod guards;
pub mod matcher;
pub mod plan;
pub mod reconcile;
pub mod resolver;
pub mod scorer;
