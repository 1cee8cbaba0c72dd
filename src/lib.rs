// Crossview Server Library
// Control-panel backend for live video productions

pub mod models;
pub mod services;
