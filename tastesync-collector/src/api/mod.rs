//! HTTP trigger surface

pub mod health;
pub mod sync_routes;

pub use health::health_routes;
pub use sync_routes::sync_routes;
