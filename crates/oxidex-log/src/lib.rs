//! A minimal, zero-dependency logging crate for the `OxideX` bridge.
//!
//! Records go to stderr, colored when stderr is a terminal. Every record
//! carries the module path it was logged from, and filtering can be set per
//! module with directives:
//!
//! ```text
//! warn                                   everything at warn and above
//! info,oxidex_bridge::runtime=trace      info, but trace inside the runtime
//! oxidex_bridge::bridge::registry=debug  error (the default) plus one module
//! ```
//!
//! The longest matching module prefix wins; modules with no directive use
//! the bare level, or `error` if none is given.
//!
//! # Example
//!
//! ```
//! use oxidex_log::{Level, debug, error, info, warn};
//!
//! oxidex_log::set_level(Level::Debug);
//!
//! let status = "running";
//! info!("Application is {}", status);
//! debug!("Debug information: {:?}", vec![1, 2, 3]);
//! warn!("This is a warning");
//! error!("This is an error message");
//! ```

use std::fmt::{self, Arguments};
use std::io::{IsTerminal, Write};
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{OnceLock, RwLock};

/// Environment variable read by [`init_from_env`].
pub const ENV_VAR: &str = "OXIDEX_LOG";

/// Log levels, from most severe (Error) to least severe (Trace).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl Level {
    const fn color_code(self) -> &'static str {
        match self {
            Level::Error => "\x1b[31m",
            Level::Warn => "\x1b[33m",
            Level::Info => "\x1b[32m",
            Level::Debug => "\x1b[36m",
            Level::Trace => "\x1b[35m",
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    const fn from_u8(value: u8) -> Level {
        match value {
            0 => Level::Error,
            1 => Level::Warn,
            2 => Level::Info,
            3 => Level::Debug,
            _ => Level::Trace,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    /// Parses a level name, ignoring case.
    ///
    /// ```
    /// use oxidex_log::Level;
    ///
    /// assert_eq!("error".parse(), Ok(Level::Error));
    /// assert_eq!("INFO".parse(), Ok(Level::Info));
    /// assert!("loud".parse::<Level>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, String> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ERROR" => Ok(Level::Error),
            "WARN" => Ok(Level::Warn),
            "INFO" => Ok(Level::Info),
            "DEBUG" => Ok(Level::Debug),
            "TRACE" => Ok(Level::Trace),
            _ => Err(format!("invalid log level: {s}")),
        }
    }
}

/// Per-module level filter built from directives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    default: Level,
    /// Sorted longest target first
    targets: Vec<(String, Level)>,
}

impl Filter {
    /// A filter applying `level` everywhere.
    #[must_use]
    pub const fn new(level: Level) -> Self {
        Filter {
            default: level,
            targets: Vec::new(),
        }
    }

    /// Adds a directive for `target` and every module below it.
    #[must_use]
    pub fn with_target(mut self, target: &str, level: Level) -> Self {
        self.targets.retain(|(t, _)| t != target);
        self.targets.push((target.to_owned(), level));
        self.targets.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        self
    }

    /// The level that applies to records from `target`.
    #[must_use]
    pub fn level_for(&self, target: &str) -> Level {
        self.targets
            .iter()
            .find(|(prefix, _)| matches_target(prefix, target))
            .map_or(self.default, |&(_, level)| level)
    }

    /// The most verbose level any module is allowed.
    #[must_use]
    pub fn max_level(&self) -> Level {
        self.targets
            .iter()
            .map(|&(_, level)| level)
            .fold(self.default, Ord::max)
    }

    #[must_use]
    pub fn enabled(&self, level: Level, target: &str) -> bool {
        level <= self.level_for(target)
    }
}

impl Default for Filter {
    fn default() -> Self {
        Filter::new(Level::Info)
    }
}

fn matches_target(prefix: &str, target: &str) -> bool {
    target
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
}

/// Parses a comma-separated list of directives into a [`Filter`].
///
/// ```
/// use oxidex_log::{Level, parse_directives};
///
/// let filter = parse_directives("info,oxidex_bridge::runtime=trace").unwrap();
/// assert_eq!(filter.level_for("oxidex_bridge::runtime::class"), Level::Trace);
/// assert_eq!(filter.level_for("oxidex_bridge::bridge"), Level::Info);
/// ```
///
/// # Errors
///
/// Returns a message naming the first directive that is not a level or a
/// `target=level` pair.
pub fn parse_directives(spec: &str) -> Result<Filter, String> {
    let mut filter = Filter::new(Level::Error);
    for directive in spec.split(',').map(str::trim).filter(|d| !d.is_empty()) {
        match directive.split_once('=') {
            Some((target, level)) => {
                let target = target.trim();
                if target.is_empty() {
                    return Err(format!("missing target in directive: {directive}"));
                }
                filter = filter.with_target(target, level.parse()?);
            }
            None => filter.default = directive.parse()?,
        }
    }
    Ok(filter)
}

/// The global logger.
///
/// The most verbose enabled level is cached in an atomic so disabled
/// records cost one load.
pub struct Logger {
    max: AtomicU8,
    filter: RwLock<Filter>,
}

impl Logger {
    fn new(filter: Filter) -> Self {
        Logger {
            max: AtomicU8::new(filter.max_level() as u8),
            filter: RwLock::new(filter),
        }
    }

    /// Replaces the filter.
    ///
    /// # Panics
    ///
    /// Panics if the filter lock is poisoned.
    pub fn set_filter(&self, filter: Filter) {
        let mut current = self.filter.write().unwrap();
        self.max.store(filter.max_level() as u8, Ordering::SeqCst);
        *current = filter;
    }

    pub fn set_level(&self, level: Level) {
        self.set_filter(Filter::new(level));
    }

    /// Returns the level for modules without a directive.
    ///
    /// # Panics
    ///
    /// Panics if the filter lock is poisoned.
    pub fn level(&self) -> Level {
        self.filter.read().unwrap().default
    }

    /// Checks if a record at `level` could be logged from some module.
    pub fn enabled(&self, level: Level) -> bool {
        level <= Level::from_u8(self.max.load(Ordering::Relaxed))
    }

    /// Checks if a record at `level` from `target` would be logged.
    ///
    /// # Panics
    ///
    /// Panics if the filter lock is poisoned.
    pub fn enabled_for(&self, level: Level, target: &str) -> bool {
        self.enabled(level) && self.filter.read().unwrap().enabled(level, target)
    }
}

static LOGGER: OnceLock<Logger> = OnceLock::new();

/// Returns the global logger, created at `Level::Info` on first use.
pub fn get_logger() -> &'static Logger {
    LOGGER.get_or_init(|| Logger::new(Filter::default()))
}

/// Sets one level for every module.
pub fn set_level(level: Level) {
    get_logger().set_level(level);
}

/// Sets one level for every module from its name.
///
/// # Errors
///
/// Returns an error if `s` is not a level name.
pub fn set_level_from_str(s: &str) -> Result<(), String> {
    set_level(s.parse()?);
    Ok(())
}

/// Replaces the global filter with the parsed `spec`.
///
/// # Errors
///
/// Same as [`parse_directives`]; the current filter is kept on error.
pub fn set_directives(spec: &str) -> Result<(), String> {
    get_logger().set_filter(parse_directives(spec)?);
    Ok(())
}

/// Applies the directives in `OXIDEX_LOG`, once per process.
///
/// Leaves the filter alone if the variable is unset. Invalid directives are
/// reported on stderr and ignored.
pub fn init_from_env() {
    static DONE: OnceLock<()> = OnceLock::new();
    DONE.get_or_init(|| {
        let Ok(spec) = std::env::var(ENV_VAR) else {
            return;
        };
        if let Err(e) = set_directives(&spec) {
            __log_with_target(
                Level::Warn,
                module_path!(),
                format_args!("ignoring {ENV_VAR}: {e}"),
            );
        }
    });
}

/// Renders one record as a line without the trailing newline.
#[must_use]
pub fn format_record(level: Level, target: &str, args: Arguments<'_>, color: bool) -> String {
    if color {
        format!("{}[{level}]\x1b[0m {target}: {args}", level.color_code())
    } else {
        format!("[{level}] {target}: {args}")
    }
}

#[doc(hidden)]
pub fn __log_with_target(level: Level, target: &str, args: Arguments<'_>) {
    static COLOR: OnceLock<bool> = OnceLock::new();
    let color = *COLOR.get_or_init(|| std::io::stderr().is_terminal());

    let line = format_record(level, target, args, color);
    // A failed write to stderr has nowhere else to go
    let _ = writeln!(std::io::stderr().lock(), "{line}");
}

/// The primary logging macro.
///
/// ```
/// use oxidex_log::{Level, log};
///
/// log!(level: Level::Info, "This is an info message: {}", 42);
/// ```
#[macro_export]
macro_rules! log {
    (level: $level:expr, $($arg:tt)*) => {{
        let level = $level;
        if $crate::get_logger().enabled_for(level, module_path!()) {
            $crate::__log_with_target(level, module_path!(), format_args!($($arg)*));
        }
    }};
}

/// Logs a message at the Error level.
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Error, $($arg)*)
    };
}

/// Logs a message at the Warn level.
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Warn, $($arg)*)
    };
}

/// Logs a message at the Info level.
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Info, $($arg)*)
    };
}

/// Logs a message at the Debug level.
///
/// ```
/// use oxidex_log::debug;
///
/// # let request = vec![1, 2, 3];
/// debug!("Processing request: {:?}", request);
/// ```
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Debug, $($arg)*)
    };
}

/// Logs a message at the Trace level.
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Trace, $($arg)*)
    };
}
