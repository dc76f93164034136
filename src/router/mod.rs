pub mod command_router;

pub use command_router::{CommandError, CommandRouter, RoutedCommand};
