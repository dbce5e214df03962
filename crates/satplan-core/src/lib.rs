pub mod action;
pub mod attitude;
pub mod config;
pub mod conflict;
pub mod error;
pub mod io;
pub mod persist;
pub mod resource;
pub mod scenario;
pub mod session;
pub mod slew;
pub mod verify;

pub use error::{PlanError, Result};
