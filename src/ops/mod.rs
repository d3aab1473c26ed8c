//! Representative wrapped operations built from the sync adapter
//! ([`crate::adapter`]) over [`crate::io_driver::IoDriver`]. spec.md treats
//! the concrete file-system operations as out-of-scope external
//! collaborators (§1), but the adapter pattern has no weight without at
//! least one concrete instance — see SPEC_FULL.md §B.
pub mod fs;
