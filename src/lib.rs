pub mod anomaly;
pub mod artifact;
pub mod bootstrap;
pub mod certification;
pub mod config;
pub mod corrector;
pub mod error;
pub mod linalg;
pub mod linear;
pub mod logging;
pub mod model;
pub mod predictor;
pub mod serve;
pub mod study;
pub mod transform;
pub mod validation;

pub use error::{ErrorKind, Result, SpilloverError};
