//! # emucomp-gateway
//!
//! HTTP and WebSocket gateway for emulation components.
//!
//! Clients create components and networks over REST and attach to their
//! consoles and virtual NICs over WebSockets, which are bridged to the
//! components' local sockets.
//!
//! ## Environment Variables
//!
//! See [`GatewayConfig::from_env`] for the full list. The most common ones:
//!
//! - `EMUCOMP_HTTP_PORT`: Listen port (default: 8080)
//! - `EMUCOMP_BASE_URL`: Public URL of the gateway
//! - `EMUCOMP_WORK_DIR`: Component working directories (default: /tmp/emucomp)

pub mod config;
pub mod error;
pub mod http;
pub mod ws;

pub use config::{ConfigError, GatewayConfig};
pub use error::{ApiError, ApiResult};
pub use http::{build_router, AppState};
