//! Hearth client: a gateway session, an entity cache and an event
//! dispatcher behind one [`Client`] handle.
//!
//! Shared wire and model types live in `hearth-shared` and are re-exported
//! as [`shared`].

pub mod api_client;
pub mod cache;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod logging;

pub use hearth_shared as shared;

pub use api_client::{ApiClient, RestTransport};
pub use cache::{CacheTxn, Cached, EntityCache};
pub use client::{Client, ClientBuilder};
pub use config::{ClientConfig, HeartbeatConfig, ReconnectConfig};
pub use dispatch::{Dispatcher, Event, HandlerFailure};
pub use error::{BoxError, ClientError, HandlerError, TransportError};
pub use gateway::{Connector, Session, SessionState, Transport, WsConnector};
pub use logging::init_tracing;
