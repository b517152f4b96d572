pub mod logging;
pub mod server;

pub use server::GtsHttpServer;
