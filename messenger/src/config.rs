use std::{str::FromStr, time::Duration};

use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use membership_net::{data_types::PortNumber, destination::Destination};
use serde::Deserialize;

use crate::{
    error::{MessengerError, MessengerResult},
    member::VmKind,
};

const CONFIG_FILE: &str = "Messenger";
const ENVIRONMENT_PREFIX: &str = "MESSENGER";

/// Settings supplied to `Messenger::init`. Every setting has a default so an empty
/// configuration is valid
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MessengerConfig {
    pub bind_address: String,
    pub bind_port: PortNumber,
    pub name: String,
    pub roles: String,
    pub groups: String,
    pub durable_client_id: Option<String>,
    pub durable_client_timeout: u32,
    pub vm_kind: String,
    pub start_locator: String,
    pub enable_network_partition_detection: bool,
    pub reader_threads: usize,
    pub statsd_host: Option<String>,
    pub stats_interval_millis: u64,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            bind_address: String::from("127.0.0.1"),
            bind_port: 0,
            name: String::new(),
            roles: String::new(),
            groups: String::new(),
            durable_client_id: None,
            durable_client_timeout: 300,
            vm_kind: String::from("normal"),
            start_locator: String::new(),
            enable_network_partition_detection: true,
            reader_threads: 0,
            statsd_host: None,
            stats_interval_millis: 1000,
        }
    }
}

impl MessengerConfig {
    /// Merges `Messenger.toml`, `Messenger.{environment}.toml` and `MESSENGER_*` environment
    /// variables, later sources overriding earlier ones. Missing files are skipped
    pub fn load(environment: &str) -> MessengerResult<Self> {
        let builder = Config::builder()
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(File::with_name(&format!("{CONFIG_FILE}.{environment}")).required(false));
        Self::build(builder)
    }

    /// Builds a configuration from inline TOML, still allowing environment overrides
    pub fn from_toml_str(toml: &str) -> MessengerResult<Self> {
        let builder = Config::builder().add_source(File::from_str(toml, FileFormat::Toml));
        Self::build(builder)
    }

    fn build(builder: ConfigBuilder<config::builder::DefaultState>) -> MessengerResult<Self> {
        let config = builder
            .add_source(Environment::with_prefix(ENVIRONMENT_PREFIX))
            .build()?;
        let settings: MessengerConfig = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(self: &Self) -> MessengerResult<()> {
        self.vm_kind()?;
        self.locator_destination()?;
        if self.bind_address.trim().is_empty() {
            return Err(MessengerError::Config {
                msg: String::from("bind_address must not be empty"),
            });
        }
        Ok(())
    }

    pub fn vm_kind(self: &Self) -> MessengerResult<VmKind> {
        VmKind::from_str(&self.vm_kind).map_err(|msg| MessengerError::Config { msg })
    }

    /// The endpoint of the locator this process starts, if it starts one
    pub fn locator_destination(self: &Self) -> MessengerResult<Option<Destination>> {
        if self.start_locator.trim().is_empty() {
            return Ok(None);
        }
        Destination::from_str(&self.start_locator)
            .map(Some)
            .map_err(|err| MessengerError::Config {
                msg: format!("start_locator: {err}"),
            })
    }

    pub fn is_locator(self: &Self) -> bool {
        matches!(self.vm_kind(), Ok(VmKind::Locator)) || !self.start_locator.trim().is_empty()
    }

    pub fn bind_authority(self: &Self) -> String {
        Destination::new(self.bind_address.trim(), self.bind_port).authority()
    }

    pub fn stats_interval(self: &Self) -> Duration {
        Duration::from_millis(u64::max(self.stats_interval_millis, 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_default_every_setting() {
        let config = MessengerConfig::from_toml_str("").unwrap();

        assert_eq!("127.0.0.1", config.bind_address);
        assert_eq!(0, config.bind_port);
        assert_eq!(300, config.durable_client_timeout);
        assert!(config.enable_network_partition_detection);
        assert!(!config.is_locator());
        assert_eq!(VmKind::Normal, config.vm_kind().unwrap());
    }

    #[test]
    fn should_read_toml() {
        let config = MessengerConfig::from_toml_str(
            r#"
            name = "server-1"
            roles = "cache"
            durable_client_id = "client-9"
            durable_client_timeout = 60
            start_locator = "localhost[10334]"
            reader_threads = 2
            "#,
        )
        .unwrap();

        assert_eq!("server-1", config.name);
        assert_eq!(Some(String::from("client-9")), config.durable_client_id);
        assert_eq!(60, config.durable_client_timeout);
        assert_eq!(2, config.reader_threads);
        assert!(config.is_locator());
        assert_eq!(
            Some(Destination::new("localhost", 10334)),
            config.locator_destination().unwrap()
        );
    }

    #[test]
    fn should_reject_unknown_vm_kind() {
        assert!(matches!(
            MessengerConfig::from_toml_str(r#"vm_kind = "manager""#),
            Err(MessengerError::Config { .. })
        ));
    }

    #[test]
    fn should_reject_malformed_locator() {
        assert!(matches!(
            MessengerConfig::from_toml_str(r#"start_locator = "no port here""#),
            Err(MessengerError::Config { .. })
        ));
    }
}
