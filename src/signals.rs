use signal_hook::{
    consts::{SIGHUP, SIGINT, SIGTERM},
    iterator::Signals,
};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::watch;

/// What should we do when the user stops this program?
///
/// The daemon loop only looks at the returned flag between checks, so an
/// in-flight restart always runs to completion.
pub fn handle_shutdown() -> std::io::Result<watch::Receiver<bool>> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let (tx, rx) = watch::channel(false);

    std::thread::spawn(move || {
        for signal in signals.forever() {
            let _ = sd_notify::notify(false, &[sd_notify::NotifyState::Stopping]);
            log::warn!("Received signal {signal}, stopping after the current check");
            let _ = tx.send(true);
        }
    });

    Ok(rx)
}

/// SIGHUP asks for the container runtime to be probed again before the next
/// check.
pub fn handle_reprobe() -> std::io::Result<Arc<AtomicBool>> {
    let mut signals = Signals::new([SIGHUP])?;
    let requested = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&requested);

    std::thread::spawn(move || {
        for _ in signals.forever() {
            let _ = sd_notify::notify(false, &[sd_notify::NotifyState::Reloading]);
            log::info!("Received SIGHUP, runtime availability will be re-probed");
            flag.store(true, Ordering::SeqCst);
        }
    });

    Ok(requested)
}
