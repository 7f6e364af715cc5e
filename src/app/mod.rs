//! Application lifecycle orchestration

pub mod armada;
pub mod charts;
pub mod error;
pub mod images;
pub mod lock;
pub mod monitor;
pub mod operator;
pub mod overrides;
pub mod record;
pub mod status;
pub mod store;

#[cfg(test)]
pub mod testing;

pub use error::AppError;
pub use operator::{AppOperator, Collaborators};
pub use record::{AppStatus, ApplicationRecord};
