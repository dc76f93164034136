pub mod frame;
pub mod routes;

pub use frame::{ClientFrame, ServerFrame};
