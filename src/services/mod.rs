// Linkshelf services
// Services provide the data layer: the backend contract, the local and hosted backends, and settings.

pub mod data_service;
pub mod local_backend;
#[cfg(feature = "hosted")]
pub mod rest_backend;
pub mod settings_engine;
