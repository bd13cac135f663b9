pub mod chat;
pub mod health;
pub mod index;

pub use chat::chat;
pub use health::health;
pub use index::rebuild_index;
