pub mod circuit;
pub mod client_session;
pub mod outbox;
pub mod world_handler;
