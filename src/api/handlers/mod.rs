pub mod action;
pub mod run;
pub mod system;
