pub mod config;
pub mod filter;
pub mod logger;
pub mod metrics;
pub mod proxy;
pub mod waf;

pub use config::*;
pub use filter::*;
pub use logger::*;
pub use metrics::MetricsCollector;
pub use proxy::{ProxyContext, SessionCallbacks, WafProxy};
pub use waf::*;
