//! Voice session lifecycle.
//!
//! ```text
//!            start                 opened
//!   Idle ───────────▶ Connecting ──────────▶ Active
//!    ▲                  │    ▲                 │
//!    │ stop             │    │ retry timer     │ transient failure
//!    │                  ▼    │                 ▼
//!    ├──────────── ErrorRetrying ◀─────────────┤
//!    │                  │ 4th failure          │ permanent failure
//!    │ stop             ▼                      │
//!    └───────────── ErrorTerminal ◀────────────┘
//! ```

pub mod handle;
pub mod manager;
pub mod retry;
pub mod state;

pub use handle::{MicrophoneSlot, SessionHandle};
pub use manager::{SessionCommand, SessionConfig, SessionManager, SessionStatus};
pub use retry::{RetryPolicy, TimerGuard};
pub use state::{Effect, Machine, Rejected, SessionEvent, SessionState, transition};
