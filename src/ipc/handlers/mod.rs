pub mod auth;
pub mod backup;
pub mod calendar;
pub mod core;
pub mod feeds;
pub mod gpa;
pub mod records;
pub mod schedule;
pub mod store;
pub mod users;
