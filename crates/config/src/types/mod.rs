mod broker;
mod controller;
mod store;

pub use broker::BrokerAuthConfig;
pub use controller::{
    ControllerConfig, DockerConfig, HardwareConfig, NodeConfig, NotificationHook, TlsConfig,
};
pub use store::{BasicAuth, MongoConfig, TrusteeConfig};
