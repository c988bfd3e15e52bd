pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod middleware;
pub mod request;
pub mod response;
pub mod scenario;
pub mod session;
pub mod slot_filling;
pub mod store;
