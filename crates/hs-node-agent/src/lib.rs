//! HumiSense node agent: library crate behind the node binary.
//!
//! Exposes the configuration, sensor drivers, telemetry scheduler and the
//! application loop so `hs-e2e-tests` can drive them with mocks.

pub mod app;
pub mod config;
pub mod mock;
pub mod scheduler;
pub mod sensor;
