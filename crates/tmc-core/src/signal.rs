use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use tmc_model::CancelToken;

static ROOT: OnceLock<CancelToken> = OnceLock::new();
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Process-wide token cancelled by the first Ctrl-C. A second Ctrl-C exits.
pub fn install_signal_handler() -> CancelToken {
    let root = ROOT.get_or_init(|| {
        let token = CancelToken::new();
        let on_signal = token.clone();
        let _ = ctrlc::set_handler(move || {
            if SHUTDOWN_REQUESTED.swap(true, Ordering::SeqCst) {
                std::process::exit(130);
            }
            on_signal.cancel();
            eprintln!("\ncancel requested, stopping current operation...");
        });
        token
    });
    root.clone()
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}
