//! Toolport router table.
//!
//! Every running instance records `project path → port` in one JSON file
//! under the user's home directory. Relays read it to find the instance
//! serving a project; instances write their own entry on start and remove
//! it on clean shutdown. The file is best-effort shared state: reads never
//! fail, writes replace the whole file.
//!
//! The [`PortAllocator`] consults the same table so that a new instance
//! never picks a port another instance has already claimed.

pub mod allocator;
pub mod error;
pub mod path;
pub mod store;
pub mod table;

pub use allocator::{
    AllocatorConfig, DEFAULT_PORT, MAX_PORT, PortAllocator, PortProbe, default_port, probe_port,
};
pub use error::{NoAvailablePortError, RegistryError};
pub use path::{normalize_workspace_path, to_filesystem_path};
pub use store::RegistryStore;
pub use table::{RouterEntry, RouterTable};
