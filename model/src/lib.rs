pub mod chat_client;
pub mod chat_model;
pub mod reasoning;

pub use chat_client::*;
pub use chat_model::*;
pub use reasoning::*;
