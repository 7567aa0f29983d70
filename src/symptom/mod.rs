//! Built-in chaos symptoms
//!
//! A symptom is a plugin that mutates traffic to simulate failure or
//! degradation: added latency, rewritten requests and responses, injected
//! errors, shaped bandwidth. Symptoms implement the same [`crate::plugin::Middleware`]
//! contract as observer middleware and use the matching engine internally to
//! decide, per event, whether to act.

mod http_delay;
mod http_error;
mod http_tamperer;
mod network_shape;
mod tcp_tamperer;

pub use http_delay::{HttpDelayConfig, HttpDelaySymptom};
pub use http_error::{HttpErrorConfig, HttpErrorSymptom};
pub use http_tamperer::{
    CookieConfig, HttpTampererConfig, HttpTampererSymptom, RequestTamperConfig,
    ResponseTamperConfig,
};
pub use network_shape::{NetworkShapeConfig, NetworkShaperSymptom};
pub use tcp_tamperer::{TcpTamperConfig, TcpTampererConfig, TcpTampererSymptom};
