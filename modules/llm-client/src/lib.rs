pub mod client;
pub mod traits;
pub mod util;

mod types;

pub use client::{ChatClient, Provider};
pub use traits::{ChatResponder, Embedder, Message, MessageRole};
