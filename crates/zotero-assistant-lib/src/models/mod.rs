// Data models module
// Domain types shared by the reducers, session and repositories

pub mod action;
pub mod citation;
pub mod event;
pub mod item;
pub mod request;
pub mod run;
pub mod settings;

// Re-export all models for convenience
pub use action::*;
pub use citation::*;
pub use event::*;
pub use item::*;
pub use request::*;
pub use run::*;
pub use settings::*;
