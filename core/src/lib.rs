pub mod error;
mod clock;
mod messaging;
mod router;
mod sensor;

pub use clock::*;
pub use messaging::*;
pub use router::*;
pub use sensor::*;

pub static CORE_VERSION: &str = env!("CARGO_PKG_VERSION");
