pub mod chat;
pub mod speak;
