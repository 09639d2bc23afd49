//! Command and query handlers for operator-facing entry points, grouped by
//! area.

pub mod subscription;
