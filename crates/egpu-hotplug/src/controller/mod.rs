//! The two top-level flows: attach (`bind`) and detach (`unbind`).

mod bind;
mod unbind;

pub use bind::BindController;
pub use bind::BindOutcome;
pub use bind::BindStage;
pub use unbind::audio_function_address;
pub use unbind::UnbindController;
pub use unbind::UnbindOutcome;
pub use unbind::UnbindStage;
