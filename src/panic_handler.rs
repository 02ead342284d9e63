use log::error;
use std::any::Any;
use std::panic;
use std::thread;

/// Install `better-panic` backtraces and record every panic in the log.
///
/// Panics on render threads are caught by the worker pool and reported as
/// lost workers; the hook only makes sure they also reach the log file.
pub fn initialize_panic_handler() {
    better_panic::install();

    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let thread = thread::current();
        let name = thread.name().unwrap_or("<unnamed>");
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        error!(
            "Thread '{name}' panicked at {location}: {}",
            panic_message(panic_info.payload())
        );

        default_hook(panic_info);
    }));
}

/// Text of a panic payload, as passed to `panic!` or `std::panic::panic_any`
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_reads_static_and_formatted_payloads() {
        let fixed = panic::catch_unwind(|| panic!("fixed text")).unwrap_err();
        assert_eq!(panic_message(fixed.as_ref()), "fixed text");

        let page = 7;
        let formatted = panic::catch_unwind(|| panic!("page {page} broke")).unwrap_err();
        assert_eq!(panic_message(formatted.as_ref()), "page 7 broke");

        let other = panic::catch_unwind(|| panic::panic_any(42u32)).unwrap_err();
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }
}
