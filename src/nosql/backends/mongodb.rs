//! MongoDB backend

pub mod connection;

pub use connection::{MongoStore, MongoStoreBuilder};
