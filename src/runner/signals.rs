//! SIGINT/SIGTERM handling: a signal sets the run's cancel flag so workers
//! wind down between cases instead of the process dying mid-reservation.

#![allow(missing_docs)]

use signal_hook::consts::{SIGINT, SIGTERM};

use crate::runner::cancel::CancelToken;

/// Register SIGTERM and SIGINT onto `token`.
///
/// Best-effort: a failed registration is reported on stderr and the run goes on.
pub fn register_cancel_signals(token: &CancelToken) {
    if let Err(e) = signal_hook::flag::register(SIGTERM, token.flag()) {
        eprintln!("[SHT-SIGNAL] failed to register SIGTERM: {e}");
    }
    if let Err(e) = signal_hook::flag::register(SIGINT, token.flag()) {
        eprintln!("[SHT-SIGNAL] failed to register SIGINT: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_leaves_token_untouched() {
        let token = CancelToken::new();
        register_cancel_signals(&token);
        assert!(!token.is_cancelled());
    }
}
