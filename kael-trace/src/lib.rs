mod context;
mod error;
mod id;
mod stack_walker;
mod symbolizer;

pub use context::{CpuContext, TargetHandle, CPU_CONTEXT_SIZE};
pub use error::SymbolError;
pub use id::stacktrace_id;
pub use stack_walker::{FakeStackWalker, StackWalker};
pub use symbolizer::Symbolizer;

#[cfg(windows)]
pub use stack_walker::WinStackWalker;
#[cfg(windows)]
pub use symbolizer::DbgHelpSymbolizer;

#[cfg(not(windows))]
pub use stack_walker::NullStackWalker;
#[cfg(not(windows))]
pub use symbolizer::NullSymbolizer;
