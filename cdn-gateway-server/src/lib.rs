mod settings;
mod worker;

pub use settings::Settings;
pub use worker::run_worker;
