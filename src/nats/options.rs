//! Configuration units for a NATS server container.
//!
//! Command options only touch [`Options`]; [`ConfigFile`] only touches the
//! launch request. Both are [`Customizer`]s so callers can hand a single list
//! to [`run_container`](super::run_container), which applies them in order.

use std::collections::HashMap;
use std::fmt;
use std::io::Read;

use crate::docker::config::LaunchRequest;
use crate::docker::error::LaunchError;

/// Where a staged config file lands inside the container
pub const CONFIG_PATH: &str = "/etc/nats.conf";

/// Permission bits of the staged config file
pub const CONFIG_MODE: u32 = 0o644;

/// Server flags collected before the launch request is built
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    /// Flag name (without dashes) -> value
    pub cmd_args: HashMap<String, String>,
}

impl Options {
    /// Render as `--<flag> <value>` pairs, flags sorted
    pub fn to_args(&self) -> Vec<String> {
        let mut flags: Vec<(&String, &String)> = self.cmd_args.iter().collect();
        flags.sort_by(|a, b| a.0.cmp(b.0));

        flags
            .into_iter()
            .flat_map(|(flag, value)| [format!("--{}", flag), value.clone()])
            .collect()
    }
}

/// Something that can shape a container before it is created
pub trait Customizer: Send {
    /// Contribute server flags. Does nothing unless overridden.
    fn apply_options(&self, _opts: &mut Options) {}

    /// Apply to the launch request. Consumes the customizer.
    fn customize(self: Box<Self>, req: &mut dyn LaunchRequest) -> Result<(), LaunchError>;
}

/// A deferred mutation of [`Options`]
pub struct CmdOption(Box<dyn Fn(&mut Options) + Send + Sync>);

impl CmdOption {
    fn new(f: impl Fn(&mut Options) + Send + Sync + 'static) -> Self {
        Self(Box::new(f))
    }

    pub fn apply(&self, opts: &mut Options) {
        (self.0)(opts)
    }
}

impl fmt::Debug for CmdOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CmdOption")
    }
}

impl Customizer for CmdOption {
    fn apply_options(&self, opts: &mut Options) {
        self.apply(opts);
    }

    fn customize(self: Box<Self>, _req: &mut dyn LaunchRequest) -> Result<(), LaunchError> {
        Ok(())
    }
}

/// Require clients to authenticate as `username`.
pub fn with_username(username: &str) -> CmdOption {
    let username = username.to_string();
    CmdOption::new(move |o| {
        o.cmd_args.insert("user".to_string(), username.clone());
    })
}

/// Require clients to authenticate with `password`.
pub fn with_password(password: &str) -> CmdOption {
    let password = password.to_string();
    CmdOption::new(move |o| {
        o.cmd_args.insert("pass".to_string(), password.clone());
    })
}

/// Set an arbitrary server flag. Dashes are stripped from the flag wherever
/// they appear, so `--max_payload` and `max_payload` are the same flag.
pub fn with_argument(flag: &str, value: &str) -> CmdOption {
    let flag = flag.replace('-', "");
    let value = value.to_string();
    CmdOption::new(move |o| {
        o.cmd_args.insert(flag.clone(), value.clone());
    })
}

/// A server configuration file to stage at [`CONFIG_PATH`]
#[derive(Default)]
pub struct ConfigFile {
    reader: Option<Box<dyn Read + Send>>,
}

impl fmt::Debug for ConfigFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigFile")
            .field("present", &self.reader.is_some())
            .finish()
    }
}

/// Pass a configuration file to the server. Changing listen addresses or
/// ports in it may keep the container from ever reporting ready.
pub fn with_config_file<R>(config: Option<R>) -> ConfigFile
where
    R: Read + Send + 'static,
{
    ConfigFile {
        reader: config.map(|r| Box::new(r) as Box<dyn Read + Send>),
    }
}

impl Customizer for ConfigFile {
    fn customize(self: Box<Self>, req: &mut dyn LaunchRequest) -> Result<(), LaunchError> {
        if let Some(reader) = self.reader {
            req.append_argument("-config".to_string());
            req.append_argument(CONFIG_PATH.to_string());
            req.append_file_mount(reader, CONFIG_PATH, CONFIG_MODE);
        }
        Ok(())
    }
}
