// Kettle Virtual Machine Module

mod frame;
pub mod host;
pub mod native;
pub mod value;
#[allow(clippy::module_inception)]
mod vm;

pub use host::{Closure, HostError, HostOps};
pub use native::NativeHost;
pub use value::{sorted_entries, HashKey, Value};
pub use vm::{Globals, Vm, VmConfig, DEFAULT_MAX_FRAMES, DEFAULT_STACK_SIZE};
