pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod identity;
pub mod storage;

pub use error::{SessionError, SessionResult};
pub use identity::{SessionManager, SessionState};

// Test-only printing helper: expands to eprintln! during tests and debug builds.
// Usage: tprintln!("session.begin op={}", op);
#[cfg(any(test, debug_assertions))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ( eprintln!($($arg)*) );
}

// In release builds, provide a no-op tprintln! so calls compile without effect.
#[cfg(not(any(test, debug_assertions)))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ({
        // Preserve formatting checks in release without producing code
        if false { let _ = format!($($arg)*); }
    });
}
