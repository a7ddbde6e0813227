pub mod graph;
pub mod manifest;
pub mod session;

pub use graph::{ModuleGraph, ModuleLoader};
pub use manifest::{find_manifest, Manifest, ManifestError};
pub use session::{Session, SessionError};
