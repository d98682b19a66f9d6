//! The `utils` module provides the pieces shared by every layer of `pgrelay`:
//! the error taxonomy and logging setup.

pub mod error;
pub mod logging;

pub use error::{BackendError, RelayError};

#[cfg(test)]
mod tests {
    use super::logging;

    #[test]
    fn logging_init_accepts_levels() {
        // Should not panic
        logging::init("info");
        logging::init("debug");
        logging::init("not-a-level");
    }
}
