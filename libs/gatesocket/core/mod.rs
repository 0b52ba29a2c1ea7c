pub mod transport;

pub use transport::{TransportMetrics, TransportSocket};
