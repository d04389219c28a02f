pub mod icons;
pub mod session_progress;

pub use session_progress::{SessionUI, UiMode, format_duration, minimal_line};
