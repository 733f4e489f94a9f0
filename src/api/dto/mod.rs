pub mod action;
pub mod run;
