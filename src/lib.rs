pub mod block;
pub mod event_bus;
pub mod logging;
pub mod settings;
#[cfg(feature = "watch")]
pub mod watch;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use block::{BlockHost, BlockParameters, FileCache, Orchestrator, PageOutput, RenderError};
pub use event_bus::{EventBus, HostEvent, InstanceId};
pub use settings::Settings;
