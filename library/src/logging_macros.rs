// Logging macros that tag every message with "[tree-updater]".
//
// Under cfg(test) they go to stdout instead of the log facade, so test output
// shows them without installing a logger. See
// https://stackoverflow.com/questions/67087597/is-it-possible-to-use-rusts-log-info-for-tests

#[doc(hidden)]
#[cfg(test)]
#[macro_export]
macro_rules! __tree_log {
    ($level:ident, $fmt:expr $(, $($arg:tt)*)?) => {
        println!(concat!("[tree-updater] ", $fmt), $($($arg)*)?)
    };
}

#[doc(hidden)]
#[cfg(not(test))]
#[macro_export]
macro_rules! __tree_log {
    ($level:ident, $fmt:expr $(, $($arg:tt)*)?) => {
        log::$level!(concat!("[tree-updater] ", $fmt), $($($arg)*)?)
    };
}

// tree_info!("applied {} steps", count)
#[macro_export]
macro_rules! tree_info {
    ($($args:tt)*) => {
        $crate::__tree_log!(info, $($args)*)
    };
}

#[macro_export]
macro_rules! tree_debug {
    ($($args:tt)*) => {
        $crate::__tree_log!(debug, $($args)*)
    };
}

#[macro_export]
macro_rules! tree_warn {
    ($($args:tt)*) => {
        $crate::__tree_log!(warn, $($args)*)
    };
}

#[macro_export]
macro_rules! tree_error {
    ($($args:tt)*) => {
        $crate::__tree_log!(error, $($args)*)
    };
}
