pub mod entity;
pub mod error;
pub mod port;
pub mod quality;
pub mod service;

pub use entity::*;
pub use error::DomainError;
pub use port::*;
pub use quality::*;
pub use service::*;
