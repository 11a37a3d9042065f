pub mod api;
pub mod wiring;
