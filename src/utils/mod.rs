//! Shared utility functions.
//!
//! - Session ID generation (collision-resistant short hex)
//! - Cancellation flag shared by background workers
//! - String truncation (UTF-8 safe, boundary-aware)

mod cancel;
mod ids;
mod string;

pub use cancel::CancelFlag;
pub use ids::generate_session_id;
pub use string::{truncate_str, truncate_with_marker};
