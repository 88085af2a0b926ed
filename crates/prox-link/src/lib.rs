//! I/O side of prox: configuration, token service clients and the async
//! driver that owns a [`prox_core::Reactor`].

pub mod config;
pub mod driver;
pub mod error;
pub mod event;
pub mod token_client;

pub use config::{Config, NamingConfig, SourceKind, StrategyKind, TokenConfig};
pub use driver::{Driver, JsonLines, Transport};
pub use error::{LinkError, Result};
pub use event::{ContactEvent, Effect};
pub use token_client::{ConfiguredSource, HttpTokenSource, StaticTokenSource, TokenSource};
