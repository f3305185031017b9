//! Local signal sources for resize propagation and signal forwarding.

use std::io;

use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};

/// Signals relayed to the remote container when no TTY is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardedSignal {
    /// `SIGINT`.
    Interrupt,
    /// `SIGTERM`.
    Terminate,
    /// `SIGHUP`.
    Hangup,
    /// `SIGQUIT`.
    Quit,
}

impl ForwardedSignal {
    /// Every forwarded signal.
    pub const ALL: [Self; 4] = [Self::Interrupt, Self::Terminate, Self::Hangup, Self::Quit];

    /// Signals that cancel a TTY session locally.
    pub const INTERRUPTS: [Self; 3] = [Self::Interrupt, Self::Terminate, Self::Hangup];

    /// Returns the name sent in `POST /containers/{id}/kill?signal=NAME`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Hangup => "SIGHUP",
            Self::Quit => "SIGQUIT",
        }
    }

    #[cfg(unix)]
    const fn kind(self) -> tokio::signal::unix::SignalKind {
        use tokio::signal::unix::SignalKind;
        match self {
            Self::Interrupt => SignalKind::interrupt(),
            Self::Terminate => SignalKind::terminate(),
            Self::Hangup => SignalKind::hangup(),
            Self::Quit => SignalKind::quit(),
        }
    }
}

/// Produces the local event streams a session listens to.
///
/// Subscribing installs process-wide handlers, so sessions only subscribe to
/// the stream they need.
pub trait SignalSource: Send + Sync {
    /// Yields once per terminal resize notification.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the handler cannot be installed.
    fn resize_events(&self) -> io::Result<BoxStream<'static, ()>>;

    /// Yields each signal that should be relayed to the container.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a handler cannot be installed.
    fn forwarded_signals(&self) -> io::Result<BoxStream<'static, ForwardedSignal>>;

    /// Yields each signal that should cancel a TTY session.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a handler cannot be installed.
    fn interrupts(&self) -> io::Result<BoxStream<'static, ForwardedSignal>>;
}

/// Listens to the operating system's signals.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSignals;

#[cfg(unix)]
impl SignalSource for OsSignals {
    fn resize_events(&self) -> io::Result<BoxStream<'static, ()>> {
        let listener = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::window_change())?;
        Ok(stream::unfold(listener, |mut signal| async move {
            signal.recv().await.map(|()| ((), signal))
        })
        .boxed())
    }

    fn forwarded_signals(&self) -> io::Result<BoxStream<'static, ForwardedSignal>> {
        listen(&ForwardedSignal::ALL)
    }

    fn interrupts(&self) -> io::Result<BoxStream<'static, ForwardedSignal>> {
        listen(&ForwardedSignal::INTERRUPTS)
    }
}

#[cfg(unix)]
fn listen(signals: &[ForwardedSignal]) -> io::Result<BoxStream<'static, ForwardedSignal>> {
    let mut listeners = Vec::with_capacity(signals.len());
    for &forwarded in signals {
        let listener = tokio::signal::unix::signal(forwarded.kind())?;
        listeners.push(
            stream::unfold(listener, move |mut signal| async move {
                signal.recv().await.map(|()| (forwarded, signal))
            })
            .boxed(),
        );
    }
    Ok(stream::select_all(listeners).boxed())
}

#[cfg(not(unix))]
impl SignalSource for OsSignals {
    fn resize_events(&self) -> io::Result<BoxStream<'static, ()>> {
        Ok(stream::pending().boxed())
    }

    fn forwarded_signals(&self) -> io::Result<BoxStream<'static, ForwardedSignal>> {
        Ok(stream::pending().boxed())
    }

    fn interrupts(&self) -> io::Result<BoxStream<'static, ForwardedSignal>> {
        Ok(stream::pending().boxed())
    }
}
