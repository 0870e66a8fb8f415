use {
    derive_more::{
        Display
    },
    std::{
        path::{
            PathBuf
        },
        str::{
            FromStr
        }
    }
};

#[macro_use]
extern crate log;

mod device;
mod enumerate;
mod hotplug;
mod names;
mod reactor;
mod registry;
mod session;

#[derive(Clone, PartialEq, Eq, Debug, Display)]
pub enum Error {
    #[display(fmt = "the joystick is not ready")]
    NotReady,
    #[display(fmt = "no device name was provided")]
    NoDeviceName,
    #[display(fmt = "cannot open the device (os error {})", errno)]
    OpenFailure { errno: i32 },
    #[display(fmt = "cannot query the device's capabilities (os error {})", errno)]
    ProbeFailure { errno: i32 },
    #[display(fmt = "cannot read from the device (os error {})", errno)]
    ReadFailure { errno: i32 },
    #[display(fmt = "cannot scan for devices (os error {})", errno)]
    EnumerationFailure { errno: i32 },
    #[display(fmt = "cannot listen for hotplug events (os error {})", errno)]
    HotplugFailure { errno: i32 },
    #[display(fmt = "cannot watch the device for readiness (os error {})", errno)]
    WatchFailure { errno: i32 },
    #[display(fmt = "no reactor was provided for the event loop mode")]
    NoReactor,
    #[display(fmt = "no joysticks were found")]
    NoDevicesFound,
    #[display(fmt = "the joystick was disconnected")]
    Disconnected,
    #[display(fmt = "no input of the requested type was found")]
    NotFound,
    #[display(fmt = "index {} is out of range (the device has {})", index, count)]
    IndexOutOfRange { index: u8, count: u8 }
}

impl std::error::Error for Error {}

impl Error {
    /// The OS error code behind this error, if there is one.
    pub fn errno( &self ) -> Option< i32 > {
        match *self {
            Error::OpenFailure { errno } |
            Error::ProbeFailure { errno } |
            Error::ReadFailure { errno } |
            Error::EnumerationFailure { errno } |
            Error::HotplugFailure { errno } |
            Error::WatchFailure { errno } => Some( errno ),
            _ => None
        }
    }

    pub(crate) fn from_io( error: std::io::Error, constructor: fn( i32 ) -> Error ) -> Error {
        constructor( error.raw_os_error().unwrap_or( libc::EIO ) )
    }
}

/// A notification emitted by a joystick session.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Event {
    ButtonPressed( u8 ),
    ButtonReleased( u8 ),
    AxisMoved( u8, i16 ),
    /// The device went away; this is always the last event of a session.
    Disconnected
}

impl Event {
    /// The button or axis this event is about.
    pub fn index( &self ) -> Option< u8 > {
        match *self {
            Event::ButtonPressed( index ) |
            Event::ButtonReleased( index ) |
            Event::AxisMoved( index, _ ) => Some( index ),
            Event::Disconnected => None
        }
    }
}

/// How event decoding is driven.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Mode {
    /// The caller drives decoding with `iteration` or `run_loop`.
    Manual,
    /// Decoding is driven by a `Reactor` whenever the device is readable.
    EventLoop
}

/// How the minimum axis event interval is applied.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AxisThrottle {
    /// An axis event is only emitted if it arrives at least the configured
    /// interval after the previously emitted event for that axis.
    Continuous,
    /// Events are only suppressed until the first one which arrives later than the
    /// configured interval after the device clock's zero; afterwards every event
    /// goes through.
    OneShot
}

impl FromStr for AxisThrottle {
    type Err = String;
    fn from_str( value: &str ) -> Result< Self, Self::Err > {
        match value {
            "continuous" => Ok( AxisThrottle::Continuous ),
            "oneshot" | "one-shot" => Ok( AxisThrottle::OneShot ),
            _ => Err( format!( "invalid axis throttle: '{}'", value ) )
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Config {
    /// Where the joystick device nodes live.
    pub device_dir: PathBuf,
    /// The minimum interval between two axis events for the same axis, in milliseconds.
    pub axis_interval_ms: u32,
    pub axis_throttle: AxisThrottle
}

impl Default for Config {
    fn default() -> Self {
        Config {
            device_dir: PathBuf::from( "/dev/input" ),
            axis_interval_ms: 0,
            axis_throttle: AxisThrottle::Continuous
        }
    }
}

/// A snapshot of a joystick's identity, taken when it was listed.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct DeviceDescriptor {
    pub path: String,
    pub name: String,
    pub axis_count: u8,
    pub button_count: u8
}

/// A change to the hotplug watcher's device list.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum DeviceChange {
    Added( DeviceDescriptor ),
    Removed( DeviceDescriptor )
}

pub use crate::device::{Capabilities, DeviceFile, RawEvent, JS_EVENT_AXIS, JS_EVENT_BUTTON, JS_EVENT_INIT};
pub use crate::enumerate::{describe_unopened, is_joystick_name, require_devices, Enumerator};
pub use crate::hotplug::{Action, DeviceList, HotplugNotice, HotplugWatcher, NoticeSource};
pub use crate::names::{AxisKind, ButtonKind};
pub use crate::reactor::{Handler, Poller, Reactor, Readiness, WatchId};
pub use crate::registry::Registry;
pub use crate::session::Session;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!( Error::NotReady.to_string(), "the joystick is not ready" );
        assert_eq!(
            Error::IndexOutOfRange { index: 9, count: 4 }.to_string(),
            "index 9 is out of range (the device has 4)"
        );
        assert!( Error::OpenFailure { errno: libc::ENOENT }.to_string().starts_with( "cannot open the device (os error " ) );
        assert_eq!( Error::ProbeFailure { errno: libc::ENOTTY }.errno(), Some( libc::ENOTTY ) );
        assert_eq!( Error::Disconnected.errno(), None );
    }
}
