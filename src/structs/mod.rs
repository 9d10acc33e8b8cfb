/// Allow normal error handling from structs
pub use super::{Result, ResultExt};

// Structs that exist in the manifest

mod name;
pub use self::name::{ContainerName, LinkRef};

mod image;
pub use self::image::{compare_tags, ImageName};

mod port;
pub use self::port::{ExposedPort, PortMapping, Protocol};

mod volume;
pub use self::volume::VolumeMount;

mod restart;
pub use self::restart::RestartPolicy;

mod env;
pub use self::env::EnvVars;

mod container;
pub use self::container::{Container, ContainerState, NetworkMode};
