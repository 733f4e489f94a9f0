pub mod action;
pub mod run;
pub mod token;

pub use action::{Action, ActionParameter, RunInput};
pub use run::{RunInfo, RunStatus};
pub use token::TokenRecord;
