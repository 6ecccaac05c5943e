use log::{LevelFilter, Log, Metadata, Record};

/// The max level when no verbosity flags are given.
#[must_use]
pub const fn default_level() -> LevelFilter {
    #[cfg(debug_assertions)]
    let max_level = LevelFilter::Debug;
    #[cfg(not(debug_assertions))]
    let max_level = LevelFilter::Info;
    max_level
}

/// Adjusts [`default_level`] by `verbose` steps up and `quiet` steps down.
#[must_use]
pub fn level_for(verbose: u8, quiet: u8) -> LevelFilter {
    const LEVELS: [LevelFilter; 6] = [
        LevelFilter::Off,
        LevelFilter::Error,
        LevelFilter::Warn,
        LevelFilter::Info,
        LevelFilter::Debug,
        LevelFilter::Trace,
    ];
    let level = default_level() as usize + usize::from(verbose);
    LEVELS[level.saturating_sub(usize::from(quiet)).min(LEVELS.len() - 1)]
}

pub fn init(max_level: LevelFilter) -> Result<(), log::SetLoggerError> {
    log::set_boxed_logger(Box::new(Logger { max_level }))?;
    log::set_max_level(max_level);
    Ok(())
}

#[derive(Debug)]
struct Logger {
    max_level: LevelFilter,
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        static LEVEL_STRS: [&str; 5] = ["[x]", "[!]", "[i]", "[?]", "[.]"];
        let level = LEVEL_STRS[record.level() as usize - 1];
        println!("{level} {}: {}", record.target(), record.args());
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_flags() {
        let default = default_level();
        assert_eq!(level_for(0, 0), default);
        assert_eq!(level_for(10, 0), LevelFilter::Trace);
        assert_eq!(level_for(0, 10), LevelFilter::Off);
        assert!(level_for(1, 0) > default);
        assert!(level_for(0, 1) < default);
    }
}
