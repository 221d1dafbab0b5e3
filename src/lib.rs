// Library exports for Snapgram
// This allows integration tests and external code to use Snapgram modules

pub mod backend;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod gateway;
pub mod interaction;
pub mod model;
pub mod query;
pub mod routes;
pub mod search;
pub mod session;
pub mod state;
pub mod validation;
