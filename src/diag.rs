//! Per-context diagnostics.
//!
//! Every [`Context`](crate::Context) carries its own severity threshold, so two
//! engines in one process can log at different levels. Log records still go
//! through the `log` facade, which means the installed logger applies its
//! own filter on top of ours.

use log::{Level, LevelFilter};

/// Override of the `log` macros that consults a [`Diagnostics`] value first.
///
/// `diag!(self.diag, Debug, "resending flight {}", n)`
macro_rules! diag {
    ($d:expr, $lvl:ident, $($arg:tt)+) => {
        if $d.enabled(::log::Level::$lvl) {
            ::log::log!(target: $d.target(), ::log::Level::$lvl, $($arg)+);
        }
    };
}

/// Severity threshold and log target for one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Diagnostics {
    threshold: LevelFilter,
}

impl Diagnostics {
    pub fn new(threshold: LevelFilter) -> Self {
        Diagnostics { threshold }
    }

    #[inline(always)]
    pub fn enabled(&self, level: Level) -> bool {
        level <= self.threshold
    }

    #[inline(always)]
    pub fn target(&self) -> &'static str {
        "tinydtls"
    }
}
