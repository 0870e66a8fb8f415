use {
    crate::{
        Error,
        names::{
            AXIS_MAP_LEN,
            BUTTON_MAP_LEN,
            AxisKind,
            ButtonKind
        },
        reactor::{
            Readiness
        }
    },
    speedy::{
        Endianness,
        Readable
    },
    std::{
        ffi::{
            CString
        },
        fmt,
        os::unix::{
            ffi::{
                OsStrExt
            },
            io::{
                AsRawFd,
                RawFd
            }
        },
        path::{
            Path
        }
    }
};

// Source of the protocol info:
//   https://www.kernel.org/doc/html/latest/input/joydev/joystick-api.html
//   include/uapi/linux/joystick.h

pub const JS_EVENT_BUTTON: u8 = 0x01;
pub const JS_EVENT_AXIS: u8 = 0x02;
pub const JS_EVENT_INIT: u8 = 0x80;

/// Size of the buffer used to fetch the device's identity string.
pub const NAME_LEN: usize = 128;

pub const RAW_EVENT_SIZE: usize = 8;

type IoctlRequest = nix::sys::ioctl::ioctl_num_type;

const JSIOCGAXES: IoctlRequest = nix::request_code_read!( b'j', 0x11, 1 );
const JSIOCGBUTTONS: IoctlRequest = nix::request_code_read!( b'j', 0x12, 1 );
const JSIOCGNAME: IoctlRequest = nix::request_code_read!( b'j', 0x13, NAME_LEN );
const JSIOCGAXMAP: IoctlRequest = nix::request_code_read!( b'j', 0x32, AXIS_MAP_LEN );
const JSIOCGBTNMAP: IoctlRequest = nix::request_code_read!( b'j', 0x34, BUTTON_MAP_LEN * 2 );

pub(crate) fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or( libc::EIO )
}

/// A single `struct js_event` as read from the device node.
#[derive(Readable, Copy, Clone, PartialEq, Eq, Debug)]
pub struct RawEvent {
    pub time: u32,
    pub value: i16,
    pub kind: u8,
    pub number: u8
}

impl RawEvent {
    pub fn parse( buffer: &[u8] ) -> Option< Self > {
        if buffer.len() != RAW_EVENT_SIZE {
            return None;
        }

        RawEvent::read_from_buffer_with_ctx( Endianness::NATIVE, buffer ).ok()
    }

    /// The event type with the "initial state" flag masked out.
    pub fn event_type( &self ) -> u8 {
        self.kind & !JS_EVENT_INIT
    }

    /// Whether this is one of the synthetic events the kernel sends right after
    /// the device is opened to report its current state.
    pub fn is_initial( &self ) -> bool {
        self.kind & JS_EVENT_INIT != 0
    }

    pub fn to_bytes( &self ) -> [u8; RAW_EVENT_SIZE] {
        let mut buffer = [0; RAW_EVENT_SIZE];
        buffer[ 0..4 ].copy_from_slice( &self.time.to_ne_bytes() );
        buffer[ 4..6 ].copy_from_slice( &self.value.to_ne_bytes() );
        buffer[ 6 ] = self.kind;
        buffer[ 7 ] = self.number;
        buffer
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) enum ReadError {
    WouldBlock,
    EndOfFile,
    ShortRead( usize ),
    Os( i32 )
}

impl ReadError {
    /// Whether the error means that the device went away.
    pub fn is_disconnect( self ) -> bool {
        match self {
            ReadError::EndOfFile => true,
            ReadError::Os( errno ) => errno == libc::ENODEV || errno == libc::EBADF,
            _ => false
        }
    }
}

/// An exclusively owned, read-only descriptor of a joystick device node.
pub struct DeviceFile {
    fd: RawFd
}

impl DeviceFile {
    pub fn open( path: &Path ) -> Result< Self, Error > {
        let path = CString::new( path.as_os_str().as_bytes() ).map_err( |_| Error::OpenFailure { errno: libc::EINVAL } )?;
        let fd = unsafe {
            libc::open( path.as_ptr(), libc::O_RDONLY | libc::O_NONBLOCK | libc::O_CLOEXEC )
        };

        if fd < 0 {
            return Err( Error::OpenFailure { errno: last_errno() } );
        }

        Ok( DeviceFile { fd } )
    }

    /// Takes ownership of an already open descriptor.
    ///
    /// # Safety
    ///
    /// `fd` must be a valid descriptor which isn't owned by anything else.
    pub unsafe fn from_raw_fd( fd: RawFd ) -> Self {
        DeviceFile { fd }
    }

    pub(crate) fn read_event( &self ) -> Result< RawEvent, ReadError > {
        let mut buffer = [0_u8; RAW_EVENT_SIZE];
        let count = unsafe {
            libc::read( self.fd, buffer.as_mut_ptr() as *mut libc::c_void, buffer.len() )
        };

        if count < 0 {
            let errno = last_errno();
            if errno == libc::EAGAIN || errno == libc::EWOULDBLOCK || errno == libc::EINTR {
                return Err( ReadError::WouldBlock );
            }
            return Err( ReadError::Os( errno ) );
        }

        let count = count as usize;
        if count == 0 {
            return Err( ReadError::EndOfFile );
        }

        RawEvent::parse( &buffer[ ..count ] ).ok_or( ReadError::ShortRead( count ) )
    }

    /// Waits up to `timeout_ms` (or forever if negative) for the descriptor to become readable.
    pub fn poll( &self, timeout_ms: i32 ) -> std::io::Result< Readiness > {
        let mut pollfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0
        };

        let result = unsafe { libc::poll( &mut pollfd, 1, timeout_ms ) };
        if result < 0 {
            let error = std::io::Error::last_os_error();
            if error.raw_os_error() == Some( libc::EINTR ) {
                return Ok( Readiness::default() );
            }
            return Err( error );
        }

        Ok( Readiness::from_revents( pollfd.revents ) )
    }
}

impl AsRawFd for DeviceFile {
    fn as_raw_fd( &self ) -> RawFd {
        self.fd
    }
}

impl Drop for DeviceFile {
    fn drop( &mut self ) {
        unsafe {
            libc::close( self.fd );
        }
    }
}

impl fmt::Debug for DeviceFile {
    fn fmt( &self, fmt: &mut fmt::Formatter ) -> fmt::Result {
        write!( fmt, "DeviceFile({})", self.fd )
    }
}

/// The capability tables of an opened device.
#[derive(Clone)]
pub struct Capabilities {
    pub axis_count: u8,
    pub button_count: u8,
    pub axis_map: [u8; AXIS_MAP_LEN],
    pub button_map: [u16; BUTTON_MAP_LEN],
    pub name: String
}

impl fmt::Debug for Capabilities {
    fn fmt( &self, fmt: &mut fmt::Formatter ) -> fmt::Result {
        fmt.debug_struct( "Capabilities" )
            .field( "axis_count", &self.axis_count )
            .field( "button_count", &self.button_count )
            .field( "name", &self.name )
            .finish()
    }
}

impl Capabilities {
    /// Builds the tables out of already known axis and button types.
    pub fn new( name: &str, axes: &[AxisKind], buttons: &[ButtonKind] ) -> Self {
        let axis_count = std::cmp::min( axes.len(), AXIS_MAP_LEN );
        let button_count = std::cmp::min( buttons.len(), 255 );

        let mut axis_map = [0; AXIS_MAP_LEN];
        for (slot, kind) in axis_map.iter_mut().zip( axes ) {
            *slot = kind.0;
        }

        let mut button_map = [0; BUTTON_MAP_LEN];
        for (slot, kind) in button_map.iter_mut().zip( buttons ) {
            *slot = kind.0;
        }

        Capabilities {
            axis_count: axis_count as u8,
            button_count: button_count as u8,
            axis_map,
            button_map,
            name: name.to_owned()
        }
    }

    pub fn axis_kind( &self, index: u8 ) -> Option< AxisKind > {
        if index >= self.axis_count {
            return None;
        }

        self.axis_map.get( index as usize ).map( |&code| AxisKind( code ) )
    }

    pub fn button_kind( &self, index: u8 ) -> Option< ButtonKind > {
        if index >= self.button_count {
            return None;
        }

        self.button_map.get( index as usize ).map( |&code| ButtonKind( code ) )
    }
}

fn ioctl_read< T >( file: &DeviceFile, request: IoctlRequest, output: *mut T ) -> Result< i32, Error > {
    let result = unsafe { libc::ioctl( file.as_raw_fd(), request as _, output ) };
    if result < 0 {
        return Err( Error::ProbeFailure { errno: last_errno() } );
    }

    Ok( result )
}

/// Queries the capability tables and the identity string of an opened device.
pub fn probe( file: &DeviceFile ) -> Result< Capabilities, Error > {
    let mut axis_map = [0_u8; AXIS_MAP_LEN];
    let mut button_map = [0_u16; BUTTON_MAP_LEN];
    let mut axis_count = 0_u8;
    let mut button_count = 0_u8;
    let mut name = [0_u8; NAME_LEN];

    ioctl_read( file, JSIOCGAXMAP, axis_map.as_mut_ptr() )?;
    ioctl_read( file, JSIOCGBTNMAP, button_map.as_mut_ptr() )?;
    ioctl_read( file, JSIOCGAXES, &mut axis_count as *mut u8 )?;
    ioctl_read( file, JSIOCGBUTTONS, &mut button_count as *mut u8 )?;
    ioctl_read( file, JSIOCGNAME, name.as_mut_ptr() )?;

    let length = name.iter().position( |&byte| byte == 0 ).unwrap_or( NAME_LEN );
    let name = String::from_utf8_lossy( &name[ ..length ] ).into_owned();

    let capabilities = Capabilities {
        axis_count: std::cmp::min( axis_count as usize, AXIS_MAP_LEN ) as u8,
        button_count,
        axis_map,
        button_map,
        name
    };

    debug!( "Probed {:?}", capabilities );
    Ok( capabilities )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(any(target_arch = "x86", target_arch = "x86_64", target_arch = "arm", target_arch = "aarch64"))]
    #[test]
    fn test_ioctl_numbers() {
        assert_eq!( JSIOCGAXES as u32, 0x8001_6a11 );
        assert_eq!( JSIOCGBUTTONS as u32, 0x8001_6a12 );
        assert_eq!( JSIOCGNAME as u32, 0x8080_6a13 );
        assert_eq!( JSIOCGAXMAP as u32, 0x8040_6a32 );
        assert_eq!( JSIOCGBTNMAP as u32, 0x8400_6a34 );
    }

    #[test]
    fn test_raw_event_parse() {
        let event = RawEvent { time: 123456, value: -32767, kind: JS_EVENT_AXIS | JS_EVENT_INIT, number: 3 };
        let parsed = RawEvent::parse( &event.to_bytes() ).unwrap();
        assert_eq!( parsed, event );
        assert_eq!( parsed.event_type(), JS_EVENT_AXIS );
        assert!( parsed.is_initial() );

        assert_eq!( RawEvent::parse( &[0; 7] ), None );
    }

    #[test]
    fn test_capabilities_lookup() {
        let capabilities = Capabilities::new( "Pad", &[ AxisKind::X, AxisKind::Y ], &[ ButtonKind::A ] );
        assert_eq!( capabilities.axis_count, 2 );
        assert_eq!( capabilities.button_count, 1 );
        assert_eq!( capabilities.axis_kind( 1 ), Some( AxisKind::Y ) );
        assert_eq!( capabilities.axis_kind( 2 ), None );
        assert_eq!( capabilities.button_kind( 0 ), Some( ButtonKind::A ) );
        assert_eq!( capabilities.button_kind( 1 ), None );
    }

    #[test]
    fn test_probe_fails_on_a_regular_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let device = DeviceFile::open( file.path() ).unwrap();
        match probe( &device ) {
            Err( Error::ProbeFailure { errno } ) => assert_eq!( errno, libc::ENOTTY ),
            result => panic!( "unexpected result: {:?}", result )
        }
    }

    #[test]
    fn test_open_missing_device() {
        match DeviceFile::open( Path::new( "/nonexistent/js0" ) ) {
            Err( Error::OpenFailure { errno } ) => assert_eq!( errno, libc::ENOENT ),
            result => panic!( "unexpected result: {:?}", result.map( |_| () ) )
        }
    }
}
