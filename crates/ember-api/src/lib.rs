pub mod auth;
pub mod chats;
pub mod error;
pub mod identity;
pub mod matches;
pub mod middleware;
