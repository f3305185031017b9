//! Local terminal helpers: size queries and raw-mode handling.

use std::io;

use tracing::{debug, warn};

/// Dimensions of a terminal in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    /// Columns.
    pub width: u16,
    /// Rows.
    pub height: u16,
}

/// Reports the current local terminal size.
pub trait TerminalSizeProvider: Send + Sync {
    /// Returns the terminal size, or `None` when there is no terminal to
    /// measure.
    fn terminal_size(&self) -> Option<TerminalSize>;
}

/// Queries the controlling terminal through `crossterm`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTerminalSizeProvider;

impl TerminalSizeProvider for SystemTerminalSizeProvider {
    fn terminal_size(&self) -> Option<TerminalSize> {
        let (width, height) = crossterm::terminal::size().ok()?;
        if width == 0 || height == 0 {
            return None;
        }
        Some(TerminalSize { width, height })
    }
}

/// Holds the local terminal in raw mode until dropped.
#[derive(Debug)]
pub(crate) struct RawModeGuard {
    _private: (),
}

impl RawModeGuard {
    /// Switches the local terminal to raw mode.
    pub(crate) fn enable() -> io::Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        debug!("local terminal switched to raw mode");
        Ok(Self { _private: () })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        match crossterm::terminal::disable_raw_mode() {
            Ok(()) => debug!("local terminal restored"),
            Err(error) => warn!(%error, "failed to restore local terminal mode"),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{TerminalSize, TerminalSizeProvider};

    struct FixedSize(Option<TerminalSize>);

    impl TerminalSizeProvider for FixedSize {
        fn terminal_size(&self) -> Option<TerminalSize> {
            self.0
        }
    }

    #[rstest]
    #[case::measured(Some(TerminalSize { width: 80, height: 24 }))]
    #[case::detached(None)]
    fn providers_are_object_safe(#[case] size: Option<TerminalSize>) {
        let provider: Box<dyn TerminalSizeProvider> = Box::new(FixedSize(size));
        assert_eq!(provider.terminal_size(), size);
    }
}
