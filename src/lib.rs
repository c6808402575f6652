pub mod config;
pub mod constants;
pub mod events;
pub mod extractors;
pub mod lock;
pub mod logging;
pub mod middleware;
pub mod response;
pub mod routes;
pub mod scoring;
pub mod services;
pub mod state;
pub mod store;
pub mod validation;
pub mod workers;
