//! # Sluice Transport
//!
//! Network transports for the Sluice service gateway.
//!
//! This crate implements the remote side of the gateway: a client that is a
//! [`ServiceGateway`](sluice_core::ServiceGateway), so handlers can call a
//! remote host exactly as they call the local one, and a server exposing a
//! [`ServiceHost`](sluice_framework::ServiceHost) on the same wire contract.
//!
//! ## Features
//!
//! - `http-client`: [`JsonServiceClient`](http::JsonServiceClient) (reqwest)
//! - `http-server`: [`HttpServer`](http::HttpServer) (axum)
//! - `full`: All transports
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │  sluice-framework    │  (gateways, ServiceHost)
//! ├──────────────────────┤
//! │  sluice-core         │  (ServiceGateway, ServiceError)
//! ├──────────────────────┤
//! │  sluice-transport    │  <- This crate (implementations)
//! ├──────────────────────┤
//! │  Network (TCP/HTTP)  │
//! └──────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sluice_transport::http::{HttpServer, JsonServiceClient};
//!
//! let handle = HttpServer::new(host).listen("127.0.0.1:8080").await?;
//!
//! let client = JsonServiceClient::new("http://127.0.0.1:8080")?;
//! let response = Gateway::from_service(client).send(Hello { name: "World".into() }).await?;
//! ```

pub mod handle;

// Transport implementations (feature-gated)
#[cfg(any(feature = "http-client", feature = "http-server"))]
pub mod http;

pub use handle::ListenerHandle;

#[cfg(feature = "http-client")]
pub use http::JsonServiceClient;

#[cfg(feature = "http-server")]
pub use http::{HttpServer, serve};
