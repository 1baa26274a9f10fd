use std::fmt;

/// Sink for everything a digitizer session has to say.
pub trait Logger: Send + Sync {
    fn print(&self, args: fmt::Arguments<'_>);
    fn info(&self, args: fmt::Arguments<'_>);
    fn debug(&self, args: fmt::Arguments<'_>);
    fn warn(&self, args: fmt::Arguments<'_>);
    fn error(&self, args: fmt::Arguments<'_>);
}

/// Forwards to the `log` facade under the `red_digitizer` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogLogger;

impl Logger for LogLogger {
    fn print(&self, args: fmt::Arguments<'_>) {
        log::info!(target: "red_digitizer", "{args}");
    }

    fn info(&self, args: fmt::Arguments<'_>) {
        log::info!(target: "red_digitizer", "{args}");
    }

    fn debug(&self, args: fmt::Arguments<'_>) {
        log::debug!(target: "red_digitizer", "{args}");
    }

    fn warn(&self, args: fmt::Arguments<'_>) {
        log::warn!(target: "red_digitizer", "{args}");
    }

    fn error(&self, args: fmt::Arguments<'_>) {
        log::error!(target: "red_digitizer", "{args}");
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoLogger;

impl Logger for NoLogger {
    fn print(&self, _: fmt::Arguments<'_>) {}
    fn info(&self, _: fmt::Arguments<'_>) {}
    fn debug(&self, _: fmt::Arguments<'_>) {}
    fn warn(&self, _: fmt::Arguments<'_>) {}
    fn error(&self, _: fmt::Arguments<'_>) {}
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Logger;
    use parking_lot::Mutex;
    use std::fmt;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Level {
        Print,
        Info,
        Debug,
        Warn,
        Error,
    }

    /// Keeps every line so tests can assert on them.
    #[derive(Default)]
    pub struct MemoryLogger {
        lines: Mutex<Vec<(Level, String)>>,
    }

    impl MemoryLogger {
        pub fn count(&self, level: Level) -> usize {
            self.lines.lock().iter().filter(|(l, _)| *l == level).count()
        }

        pub fn contains(&self, level: Level, needle: &str) -> bool {
            self.lines
                .lock()
                .iter()
                .any(|(l, line)| *l == level && line.contains(needle))
        }

        fn push(&self, level: Level, args: fmt::Arguments<'_>) {
            self.lines.lock().push((level, args.to_string()));
        }
    }

    impl Logger for MemoryLogger {
        fn print(&self, args: fmt::Arguments<'_>) {
            self.push(Level::Print, args);
        }

        fn info(&self, args: fmt::Arguments<'_>) {
            self.push(Level::Info, args);
        }

        fn debug(&self, args: fmt::Arguments<'_>) {
            self.push(Level::Debug, args);
        }

        fn warn(&self, args: fmt::Arguments<'_>) {
            self.push(Level::Warn, args);
        }

        fn error(&self, args: fmt::Arguments<'_>) {
            self.push(Level::Error, args);
        }
    }
}
