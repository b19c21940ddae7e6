//! The rotation engine: per-cycle orchestration and custody validation.

pub mod rotator;
pub mod validator;

pub use rotator::Rotator;
