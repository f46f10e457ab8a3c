pub mod handler;
pub mod settings;

pub use handler::handle_event;
pub use settings::Settings;
