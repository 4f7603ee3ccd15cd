pub mod server;

pub use server::run_ui_server;
