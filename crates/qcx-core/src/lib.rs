pub mod config;
pub mod descriptor;
pub mod error;
pub mod events;
pub mod output;
pub mod process;
pub mod result;
pub mod session;
pub mod tree;

pub use config::{Config, ConfigError};
pub use descriptor::{Normalizer, TestDescriptor};
pub use error::ExplorerError;
pub use events::{EventReceiver, EventSender, ExplorerEvent, SuiteState};
pub use process::{CancelHandle, DebugOverlay, Target};
pub use result::{Decoration, TestState};
pub use session::{DebugLauncher, Session, Workspace};
pub use tree::{Node, SuiteNode, TestNode, ROOT_ID};
