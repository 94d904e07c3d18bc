pub mod cli;
pub mod daemon;
pub mod mig;

pub use cli::*;
pub use daemon::*;
pub use mig::*;
