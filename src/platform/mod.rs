use std::fmt::Display;

mod pulse;
pub use pulse::PulseSession;

use crate::errors::AppResult;

/// The two sides of the status feed, each backed by one device class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Input,
    Output,
}

impl Source {
    pub fn class(self) -> DeviceClass {
        match self {
            Source::Input => DeviceClass::Source,
            Source::Output => DeviceClass::Sink,
        }
    }
}

impl Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // These are the protocol tokens, not display names.
        let token = match self {
            Self::Input => "input",
            Self::Output => "output",
        };
        write!(f, "{token}")
    }
}

/// Device class in session-manager terms: sinks play, sources capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Sink,
    Source,
}

/// Numeric id of a node in the session manager's graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceId(pub u32);

impl DeviceId {
    /// "No default device". Valid and storable.
    pub const NONE: DeviceId = DeviceId(0);
    /// Reserved reply while the server is still settling a default after a
    /// graph mutation. Never a real device; must not be stored or printed.
    pub const INVALID: DeviceId = DeviceId(u32::MAX);

    pub fn is_invalid(self) -> bool {
        self == Self::INVALID
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One row of a live enumeration snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub id: DeviceId,
    pub class: DeviceClass,
}

/// Volume and mute state of one device, fetched per query and never cached.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeReading {
    pub level: f64,
    pub muted: bool,
}

/// What the watcher needs from the audio session manager.
///
/// Change notifications are not part of the trait: a backend takes the event
/// queue's `Sender` at construction and feeds `AudioEvent`s in from there.
pub trait AudioSession {
    /// Live snapshot of every sink- and source-class device.
    fn enumerate_devices(&mut self) -> AppResult<Vec<DeviceEntry>>;
    /// Current default device of a class. `DeviceId::NONE` when there is no
    /// default, `DeviceId::INVALID` while one is still settling.
    fn default_device(&mut self, class: DeviceClass) -> AppResult<DeviceId>;
    fn volume(&mut self, class: DeviceClass, device: DeviceId) -> AppResult<VolumeReading>;
    /// Returns once every outstanding request to the server has been flushed.
    fn sync_barrier(&mut self) -> AppResult<()>;
}
