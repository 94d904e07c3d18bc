//! Application wiring: the long-running daemon and one-shot commands

pub mod daemon;
pub mod print_state;

pub use daemon::Application;
pub use print_state::run_print_state;
