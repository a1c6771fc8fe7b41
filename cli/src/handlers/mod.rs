mod config_args;
mod convert;
mod inspect;
mod progress;
mod schema;

pub use config_args::ConfigArgs;
pub use convert::handle_convert;
pub use inspect::handle_inspect;
pub use schema::handle_schema;
