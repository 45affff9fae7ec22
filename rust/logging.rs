//! Explicit log channels.
//!
//! Components never reach for a global logger. They are handed a [`Logger`]
//! from a [`LogRegistry`] when constructed, and every record they emit goes
//! through the registry's level filter before reaching the `log` facade with
//! the channel name as target. The binaries install `env_logger` as the
//! backend.

use std::{
    cell::{Cell, RefCell},
    collections::BTreeMap,
    fmt,
    rc::Rc,
};

use log::{Level, LevelFilter};

/// Global minimum level plus per-channel overrides.
#[derive(Debug)]
pub struct LogRegistry {
    min_level: Cell<LevelFilter>,
    overrides: RefCell<BTreeMap<String, LevelFilter>>,
}

impl LogRegistry {
    pub fn new(min_level: LevelFilter) -> Rc<Self> {
        Rc::new(Self {
            min_level: Cell::new(min_level),
            overrides: RefCell::new(BTreeMap::new()),
        })
    }

    pub fn set_min_level(&self, level: LevelFilter) {
        self.min_level.set(level);
    }

    pub fn min_level(&self) -> LevelFilter {
        self.min_level.get()
    }

    /// Overrides the level for one channel, regardless of the global minimum.
    pub fn set_channel_level(&self, channel: &str, level: LevelFilter) {
        self.overrides
            .borrow_mut()
            .insert(channel.to_owned(), level);
    }

    pub fn enabled(&self, channel: &str, level: Level) -> bool {
        let filter = self
            .overrides
            .borrow()
            .get(channel)
            .copied()
            .unwrap_or_else(|| self.min_level.get());
        level <= filter
    }

    pub fn channel(self: &Rc<Self>, name: &str) -> Logger {
        Logger {
            channel: Rc::from(name),
            registry: Rc::clone(self),
        }
    }
}

/// A named channel handed to one component.
#[derive(Clone)]
pub struct Logger {
    channel: Rc<str>,
    registry: Rc<LogRegistry>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Logger").field(&self.channel).finish()
    }
}

impl Logger {
    /// A channel on a private registry, for components built without one.
    pub fn detached(name: &str) -> Self {
        LogRegistry::new(LevelFilter::Info).channel(name)
    }

    pub fn name(&self) -> &str {
        &self.channel
    }

    /// Derives a sub-channel, e.g. `markers` -> `markers/rt/markers`.
    pub fn child(&self, suffix: &str) -> Self {
        self.registry.channel(&format!("{}/{suffix}", self.channel))
    }

    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        if self.registry.enabled(&self.channel, level) {
            log::log!(target: &*self.channel, level, "{args}");
        }
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Error, args);
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Warn, args);
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Info, args);
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Debug, args);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_override_beats_global_level() {
        let registry = LogRegistry::new(LevelFilter::Warn);
        assert!(!registry.enabled("markers", Level::Debug));
        registry.set_channel_level("markers", LevelFilter::Debug);
        assert!(registry.enabled("markers", Level::Debug));
        assert!(!registry.enabled("points", Level::Info));
    }

    #[test]
    fn child_channels_share_the_registry() {
        let registry = LogRegistry::new(LevelFilter::Error);
        let child = registry.channel("markers").child("rt/markers");
        assert_eq!(child.name(), "markers/rt/markers");
        registry.set_min_level(LevelFilter::Trace);
        assert!(registry.enabled(child.name(), Level::Trace));
    }
}
