#[macro_use]
mod log;

pub mod codec;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod reactor;
pub mod registry;
pub mod scanner;
pub mod transport;

pub use engine::{Engine, TimerKind};
pub use error::Error;
pub use reactor::Reactor;
pub use registry::{Registry, SlaveHandlers};
pub use transport::{Transport, TtyTransport};
