pub mod common;
pub mod errors;
pub mod event;
