//! Runtime side of compiled code: the dispatch table and the resources the
//! collector tracks for every compiled method

pub mod code_cache;
pub mod manager;
pub mod runtime_data;

pub use code_cache::CodeCache;
pub use manager::{CodeManager, JitInfo};
pub use runtime_data::{CodeResource, ResourceId, RuntimeData, RuntimeDataHolder};
