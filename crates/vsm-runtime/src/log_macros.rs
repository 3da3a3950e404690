/// Domain-aware diagnostic logging macros.
///
/// Each macro injects a `domain` field automatically so callers never need
/// to remember the string literal. Domains in use: `sys` (lifecycle), `conn`
/// (IPC transports), `pipe` (dispatch/emit path), `conf` (configuration).
///
/// ```ignore
/// vsm_info!(sys, rules = 3, "engine bootstrap complete");
/// vsm_warn!(conn, error = %e, "transport read error");
/// ```

#[doc(hidden)]
macro_rules! vsm_log {
    ($level:ident, $domain:ident, $($field:tt)*) => {
        tracing::$level!(domain = stringify!($domain), $($field)*)
    };
}

macro_rules! vsm_error {
    ($domain:ident, $($rest:tt)*) => {
        vsm_log!(error, $domain, $($rest)*)
    };
}

macro_rules! vsm_warn {
    ($domain:ident, $($rest:tt)*) => {
        vsm_log!(warn, $domain, $($rest)*)
    };
}

macro_rules! vsm_info {
    ($domain:ident, $($rest:tt)*) => {
        vsm_log!(info, $domain, $($rest)*)
    };
}

macro_rules! vsm_debug {
    ($domain:ident, $($rest:tt)*) => {
        vsm_log!(debug, $domain, $($rest)*)
    };
}

#[allow(unused_macros)]
macro_rules! vsm_trace {
    ($domain:ident, $($rest:tt)*) => {
        vsm_log!(trace, $domain, $($rest)*)
    };
}
