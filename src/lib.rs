pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod render;
pub mod store;
pub mod thread;

pub use error::{Result, StoreError};
pub use models::{EmailAddress, Message};
pub use store::RecordStore;
pub use thread::{ThreadNode, ThreadView};
