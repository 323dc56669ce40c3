pub mod chat;
pub mod documents;
pub mod health;
pub mod search;
pub mod sessions;
