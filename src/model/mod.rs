pub mod openai_like;
pub mod provider;

pub use provider::ModelProvider;
