mod handlers;
mod server;

pub use server::{QueryServer, QueryServerBuilder, QueryState};
