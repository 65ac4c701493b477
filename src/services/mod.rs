pub mod archive;
pub mod credentials;
pub mod feedback;
pub mod gemini;
pub mod queue;
pub mod retry;
pub mod store;
pub mod telegram;
