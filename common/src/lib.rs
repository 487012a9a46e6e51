//! Small helpers shared by the user-facing binaries.

pub mod elapsed;
