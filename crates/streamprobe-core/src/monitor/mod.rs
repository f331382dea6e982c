pub mod engine;
pub mod event;
pub mod state;

pub use engine::{Engine, EngineParts};
pub use event::{EventKind, StreamEvent};
pub use state::{Scte35Event, StreamConfig};
