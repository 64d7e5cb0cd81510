pub mod callback;
pub mod handler;
pub mod models;
pub mod pos;
pub mod websocket;

pub use handler::AppState;
