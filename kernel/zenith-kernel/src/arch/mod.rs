//! Architecture-specific code. Only x86_64 is implemented; the module
//! boundary keeps the rest of the kernel portable on paper.

pub mod x86_64;

pub use x86_64::{cpu_init, halt_forever, platform_init};
