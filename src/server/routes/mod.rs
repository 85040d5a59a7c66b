pub mod chat;
pub mod completions;
pub mod images;
pub mod models;
pub mod responses;
