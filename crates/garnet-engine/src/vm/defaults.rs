//! Default constants for VM configuration.
//!
//! Centralizes the sizes and limits shared by the foreign-call bridge,
//! the collector driver and the background compiler.

/// Size of the stack buffer owned by every foreign call context (64 KiB).
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

/// Largest stack buffer a foreign call context may request (8 MiB).
pub const MAX_STACK_SIZE: usize = 8 * 1024 * 1024;

/// Initial slot capacity of a freshly created handle table.
pub const DEFAULT_HANDLE_CAPACITY: usize = 16;

/// Bound of the background compiler's request queue.
pub const DEFAULT_JIT_QUEUE_CAPACITY: usize = 64;

/// First address handed out by the object heap.
pub const HEAP_BASE_ADDRESS: u64 = 0x1000;

/// Distance between two consecutive heap addresses.
pub const HEAP_ADDRESS_STRIDE: u64 = 16;

/// Upper bound on the total size of compiled code kept in the code cache (64 MiB).
pub const DEFAULT_CODE_CACHE_SIZE: usize = 64 * 1024 * 1024;
