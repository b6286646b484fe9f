pub mod chat;
mod dispatch;
pub mod debates;
pub mod health;
pub mod models;
pub mod providers;
pub mod tasks;
