pub mod segments;
pub mod timer;
