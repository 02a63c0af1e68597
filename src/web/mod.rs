mod handlers;
mod routes;
mod ws;

pub use handlers::STAGED_MESSAGE;
pub use routes::{create_router, MAX_PAYLOAD_BYTES};
pub use ws::ws_handler;
