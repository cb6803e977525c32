pub mod config;
pub mod error;
pub mod identity;
pub mod session_store;
pub mod object_storage;
pub mod server;
pub mod bootstrap;

// Test-only printing helper: expands to eprintln! in debug and test builds and is absent otherwise.
// Usage: tprintln!("session.issue user={}", user);
#[cfg(any(test, debug_assertions))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ( eprintln!($($arg)*) );
}

// In non-test builds, provide a no-op tprintln! so calls compile without effect.
#[cfg(not(any(test, debug_assertions)))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ({
        // Preserve formatting checks in release without producing code
        if false { let _ = format!($($arg)*); }
    });
}
