pub mod context;
pub mod delivery;
pub mod gateway;
pub mod middleware;
pub mod options;
pub mod pool;
pub mod settings;

pub use context::DeliveryContext;
pub use delivery::{
    dispatcher::Dispatcher,
    entities::{Device, Message, ToDevice, ToMessage},
    error::{FailureReason, PlingError},
    registry::{FromOptions, Registry},
};
pub use gateway::{Deliver, Gateway};
pub use middleware::{Middleware, Next};
pub use options::Options;
