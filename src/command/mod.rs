pub mod model;
pub mod scenario;

pub use model::{Command, CommandKind};
pub use scenario::Scenario;
