pub mod backend;
pub mod call;
pub mod config;
pub mod consumer;
pub mod descriptor;
pub mod environment;
pub mod error;
pub mod identity;
pub mod interceptor;
pub mod kafka;
pub mod message;
pub mod naming;
pub mod registry;
pub mod transaction;

pub use call::{ProducerCall, RawCall, TransactionalCall};
pub use config::Config;
pub use environment::Environment;
pub use error::{Error, Result};
pub use identity::Properties;
pub use interceptor::{Interceptor, Redirecting};
pub use message::{Message, SendOutcome};
pub use registry::EntityRegistry;
