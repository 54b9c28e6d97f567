pub mod calibrator;
pub mod models;
pub mod settings;
pub mod switch;
