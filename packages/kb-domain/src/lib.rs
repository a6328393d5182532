pub mod cjk;
pub mod segment;
