pub mod bounded;
pub mod credentials;
pub mod shadows;
pub mod telemetry;
pub mod time;
pub mod topics;

pub use bounded::*;
pub use credentials::*;
pub use shadows::*;
pub use telemetry::*;
pub use time::*;
