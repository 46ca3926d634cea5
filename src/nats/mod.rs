pub mod container;
pub mod options;

pub use container::{run_container, NatsContainer};
pub use options::{with_argument, with_config_file, with_password, with_username, Customizer};
