//! Dialogos Runtime
//!
//! Everything needed to actually run a parsed [`dialogos_frontend::ast::Program`]:
//! the insert store, the interpolation engine, the task interpreter itself
//! (control flow, concurrency, chat transport), and the ambient concerns
//! that accompany a long-running interpreter loop — cooperative
//! cancellation, a structured execution trace, and save-slot persistence.

pub mod cancel;
pub mod chat;
pub mod error;
pub mod frame;
pub mod interpolate;
pub mod interpreter;
pub mod prompt;
pub mod save;
pub mod state;
pub mod store;
pub mod trace;

pub use cancel::CancelToken;
pub use chat::ChatConfig;
pub use error::{RtResult, RuntimeError};
pub use interpreter::Interpreter;
pub use prompt::{PromptChannel, PromptOutcome};
pub use state::SavedState;
pub use store::InsertStore;
pub use trace::Trace;
