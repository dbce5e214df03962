pub mod config;
pub mod plan;
pub mod slew;
pub mod verify;
