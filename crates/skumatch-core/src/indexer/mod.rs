pub mod candidates;
pub mod normalize;
pub mod records;
