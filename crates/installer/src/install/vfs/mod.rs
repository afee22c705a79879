//! Devirtualization of package VFS files
//!
//! Maps `VFS\<token>\...` payload files onto real folders and decides, file by
//! file, whether what is already there should be replaced.

pub mod decision;
pub mod fs_utils;
pub mod mapping;
pub mod reconciler;
pub mod resolver;
pub mod version;

pub use decision::{CopyDecision, CopyReason, ExistingTarget, SkipReason};
pub use mapping::PathMappings;
pub use reconciler::{FileOutcome, FileRecord, RemoveReport, SharedFiles, SyncReport, VfsReconciler};
pub use resolver::{VfsPathResolver, is_under_root};
pub use version::{FileTimes, FileVersion};
