pub mod action_service;
pub mod run_service;
pub mod run_state;
pub mod streams;
pub mod token_store;

pub use action_service::ActionService;
pub use run_service::RunService;
pub use run_state::{RunHandle, RunManager};
pub use streams::{StreamCapture, StreamChunk};
pub use token_store::{TokenError, TokenStore};
