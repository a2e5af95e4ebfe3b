//! Console output for the binaries.
//!
//! Every macro takes either just the message, or the message plus the
//! `greppable` and `accessible` switches. Greppable mode prints nothing
//! (the results go out as `ip -> [ports]` lines instead); accessible mode
//! drops the coloured tag so screen readers only get the text.

#[doc(hidden)]
#[macro_export]
macro_rules! __tagged {
    ($tag:expr, $name:expr, $greppable:expr, $accessible:expr) => {
        if !$greppable {
            if $accessible {
                println!("{}", $name);
            } else {
                println!("{} {}", $tag, $name);
            }
        }
    };
}

/// Something went wrong or is missing: `[!]` in red.
#[macro_export]
macro_rules! warning {
    ($name:expr) => {
        $crate::warning!($name, false, false)
    };
    ($name:expr, $greppable:expr, $accessible:expr) => {
        $crate::__tagged!(
            colored::Colorize::bold(colored::Colorize::red("[!]")),
            $name,
            $greppable,
            $accessible
        )
    };
}

/// What the scan is doing: `[~]` in blue.
#[macro_export]
macro_rules! detail {
    ($name:expr) => {
        $crate::detail!($name, false, false)
    };
    ($name:expr, $greppable:expr, $accessible:expr) => {
        $crate::__tagged!(
            colored::Colorize::bold(colored::Colorize::blue("[~]")),
            $name,
            $greppable,
            $accessible
        )
    };
}

/// A finding: `[>]` in green.
#[macro_export]
macro_rules! output {
    ($name:expr) => {
        $crate::output!($name, false, false)
    };
    ($name:expr, $greppable:expr, $accessible:expr) => {
        $crate::__tagged!(
            colored::Colorize::bold(colored::Colorize::truecolor("[>]", 0, 255, 9)),
            $name,
            $greppable,
            $accessible
        )
    };
}

/// Prints a live host and its ports.
///
/// Greppable mode prints `ip -> [ports]` and nothing else; otherwise the
/// line reads like a sentence.
#[macro_export]
macro_rules! host_ports {
    ($host:expr, $ports:expr, $greppable:expr, $accessible:expr) => {
        if $greppable {
            println!("{} -> {}", $host, $ports);
        } else {
            $crate::output!(
                format!("Host {} has the following ports open: {}", $host, $ports),
                false,
                $accessible
            );
        }
    };
}
