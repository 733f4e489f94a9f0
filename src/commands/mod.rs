pub mod daemon;
pub mod token;
