pub mod app;
pub mod output;

pub use app::Application;
