//! Single-hart RV32IM emulator with paged memory, memory-mapped peripherals,
//! a cooperative OS-call gateway, and a breakpoint debugger.

pub mod config;
pub mod debug;
pub mod emulator;
pub mod exceptions;
pub mod memory;
pub mod peripherals;

pub use config::EmulatorConfig;
pub use debug::{Breakpoint, DebugResult, DebugSymbols, DebugValue, ExprError, PointerKind};
pub use emulator::{
    Emulator, Interrupt, InterruptSender, TerminateHandle, END_SENTINEL, RESUME_SENTINEL,
    RESUME_SENTINEL_EVEN,
};
pub use exceptions::RuntimeException;
pub use memory::{MemoryImage, MemoryPage};
pub use peripherals::{DisplayUpdate, VirtualDisplay, VirtualFileSystem};
