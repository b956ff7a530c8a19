//! The hooks through which the engine talks to whoever is driving it.

/// User-facing side of a session.
///
/// Every method has a quiet default, so an implementation only overrides what it shows.
pub trait Frontend {
    /// An informational notice, such as a server warning.
    fn message(&mut self, text: &str) {
        log::info!("{}", text);
    }

    /// Something went wrong that the user should know about.
    fn error(&mut self, text: &str) {
        log::error!("{}", text);
    }

    /// Ask a yes/no question. The default answers `default`.
    fn confirm(&mut self, _prompt: &str, default: bool) -> bool {
        default
    }

    /// Whether the user asked to interrupt the current operation.
    fn interrupted(&mut self) -> bool {
        false
    }

    /// Forget a pending interrupt.
    fn clear_interrupt(&mut self) {}
}

/// A frontend that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl Frontend for Silent {}
