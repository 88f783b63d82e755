use std::sync::{Arc, Once};

use cspy_config::{init_tracing, AdapterConfig};

static PANIC_HOOK: Once = Once::new();

/// Initialize structured logging and install a process-wide panic hook.
///
/// The hook records the panic through `tracing` and hands a one-line summary to
/// `notifier`. It is installed once; later calls only (re)try logging setup.
pub fn init(config: &AdapterConfig, notifier: Arc<dyn Fn(&str) + Send + Sync + 'static>) {
    init_tracing(&config.logging);
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if cfg!(debug_assertions) {
                previous(info);
            }
            let message = panic_message(info);
            let location = info
                .location()
                .map(|loc| loc.to_string())
                .unwrap_or_else(|| "<unknown>".to_owned());
            tracing::error!(
                target: "cspy.dap.panic",
                panic_message = %message,
                panic_location = %location,
                "panic captured"
            );
            notifier(&format!("cspy-dap panicked at {location}: {message}"));
        }));
    });
}

fn panic_message(info: &std::panic::PanicHookInfo<'_>) -> String {
    if let Some(message) = info.payload().downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = info.payload().downcast_ref::<String>() {
        message.clone()
    } else {
        "<non-string panic payload>".to_owned()
    }
}
