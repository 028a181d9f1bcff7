pub mod accounts;
pub mod actors;
pub mod auth;
pub mod health;
