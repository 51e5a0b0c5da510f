pub mod classify;
pub mod client;
pub mod config;
pub mod device;
pub mod error;
pub mod flow;
pub mod service;
pub mod support;
pub mod task;
pub mod transport;

pub use client::U2fClient;
pub use config::ClientConfig;
pub use error::{ClassifiedError, ConfigError, Error, ErrorKind, TransportError};
pub use flow::{AuthenticationFlow, DeviceContext, RegistrationFlow, UnlockFlow};
pub use service::{RestartableService, ServiceState};
