pub mod config;
pub mod console;
pub mod dispatch;
pub mod error;
pub mod hardware;
pub mod io;
pub mod link;
pub mod logbook;
pub mod paths;
pub mod registry;
pub mod settings;
pub mod sync;
pub mod types;
pub mod units;

pub use console::Console;
pub use error::{AxisError, ErrorKind, Result};
