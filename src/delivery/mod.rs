pub mod dispatcher;
pub mod entities;
pub mod error;
pub mod registry;
