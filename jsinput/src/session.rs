use {
    crate::{
        AxisThrottle,
        Config,
        DeviceDescriptor,
        Error,
        Event,
        Mode,
        device::{
            self,
            Capabilities,
            DeviceFile,
            RawEvent,
            ReadError,
            JS_EVENT_AXIS,
            JS_EVENT_BUTTON
        },
        names::{
            AxisKind,
            ButtonKind
        },
        reactor::{
            Reactor,
            Readiness,
            WatchId
        },
        registry::{
            RegistryInner
        }
    },
    parking_lot::{
        Mutex
    },
    std::{
        fmt,
        os::unix::{
            io::{
                AsRawFd
            }
        },
        path::{
            Path
        },
        sync::{
            Arc,
            Weak,
            atomic::{
                AtomicBool,
                Ordering
            }
        }
    }
};

// How often a blocking loop wakes up to check whether it should stop.
const LOOP_WAKEUP_MS: i32 = 100;

pub(crate) struct SessionState {
    file: Option< DeviceFile >,
    capabilities: Option< Capabilities >,
    axis_values: Vec< i16 >,
    button_values: Vec< bool >,
    last_axis_event: Vec< u32 >,
    axis_interval_ms: u32,
    axis_throttle: AxisThrottle,
    mode: Mode,
    reactor: Option< Arc< dyn Reactor > >,
    watch: Option< WatchId >,
    disconnected: bool,
    open_error: Option< Error >,
    subscribers: Vec< flume::Sender< Event > >
}

impl SessionState {
    fn new( config: &Config, reactor: Option< Arc< dyn Reactor > > ) -> Self {
        SessionState {
            file: None,
            capabilities: None,
            axis_values: Vec::new(),
            button_values: Vec::new(),
            last_axis_event: Vec::new(),
            axis_interval_ms: config.axis_interval_ms,
            axis_throttle: config.axis_throttle,
            mode: if reactor.is_some() { Mode::EventLoop } else { Mode::Manual },
            reactor,
            watch: None,
            disconnected: false,
            open_error: None,
            subscribers: Vec::new()
        }
    }

    fn capabilities( &self ) -> Result< &Capabilities, Error > {
        self.capabilities.as_ref().ok_or( Error::NotReady )
    }

    fn reset( &mut self ) {
        self.cancel_watch();
        self.file = None;
        self.capabilities = None;
        self.axis_values.clear();
        self.button_values.clear();
        self.last_axis_event.clear();
    }

    fn install( &mut self, file: DeviceFile, capabilities: Capabilities ) {
        self.axis_values = vec![ 0; capabilities.axis_count as usize ];
        self.button_values = vec![ false; capabilities.button_count as usize ];
        self.last_axis_event = vec![ 0; capabilities.axis_count as usize ];
        self.file = Some( file );
        self.capabilities = Some( capabilities );
    }

    fn cancel_watch( &mut self ) {
        if let Some( id ) = self.watch.take() {
            if let Some( ref reactor ) = self.reactor {
                reactor.unwatch( id );
            }
        }
    }

    /// Decodes a single record; returns the event which should be emitted, if any.
    fn handle_event( &mut self, event: RawEvent ) -> Option< Event > {
        let index = event.number;
        match event.event_type() {
            JS_EVENT_BUTTON => {
                let value = match self.button_values.get_mut( index as usize ) {
                    Some( value ) => value,
                    None => {
                        warn!( "Dropping an event for button #{} which the device didn't report", index );
                        return None;
                    }
                };

                *value = event.value != 0;
                if event.value != 0 {
                    Some( Event::ButtonPressed( index ) )
                } else {
                    Some( Event::ButtonReleased( index ) )
                }
            },
            JS_EVENT_AXIS => {
                let value = match self.axis_values.get_mut( index as usize ) {
                    Some( value ) => value,
                    None => {
                        warn!( "Dropping an event for axis #{} which the device didn't report", index );
                        return None;
                    }
                };

                *value = event.value;
                let last = &mut self.last_axis_event[ index as usize ];

                // The device clock is a free-running u32 which wraps; only the distance matters.
                let elapsed = event.time.wrapping_sub( *last );
                if self.axis_interval_ms == 0 || elapsed > self.axis_interval_ms {
                    if self.axis_throttle == AxisThrottle::Continuous {
                        *last = event.time;
                    }
                    Some( Event::AxisMoved( index, event.value ) )
                } else {
                    None
                }
            },
            kind => {
                trace!( "Ignoring an event of unknown type {:#04x}", kind );
                None
            }
        }
    }

    fn emit( &mut self, event: Event ) {
        self.subscribers.retain( |subscriber| subscriber.send( event ).is_ok() );
    }
}

pub(crate) struct SessionObject {
    path: String,
    registry: Weak< RegistryInner >,
    state: Mutex< SessionState >
}

impl Drop for SessionObject {
    fn drop( &mut self ) {
        debug!( "Closing {}", self.path );
        self.state.get_mut().cancel_watch();
        if let Some( registry ) = self.registry.upgrade() {
            registry.forget( &self.path, self as *const SessionObject );
        }
    }
}

enum Step {
    Decoded,
    Idle,
    Hangup,
    Closed,
    Failed( i32 )
}

/// A shared handle to an open joystick device.
///
/// Cloning the handle adds a reference; the device is closed when the last one is dropped.
#[derive(Clone)]
pub struct Session( pub(crate) Arc< SessionObject > );

impl fmt::Debug for Session {
    fn fmt( &self, fmt: &mut fmt::Formatter ) -> fmt::Result {
        let state = self.0.state.lock();
        fmt.debug_struct( "Session" )
            .field( "path", &self.0.path )
            .field( "ready", &state.capabilities.is_some() )
            .field( "mode", &state.mode )
            .field( "disconnected", &state.disconnected )
            .finish()
    }
}

impl Session {
    pub(crate) fn new( path: &str, registry: Weak< RegistryInner >, config: &Config, reactor: Option< Arc< dyn Reactor > > ) -> Self {
        Session( Arc::new( SessionObject {
            path: path.to_owned(),
            registry,
            state: Mutex::new( SessionState::new( config, reactor ) )
        }))
    }

    /// Wraps an already open descriptor with known capabilities; the session won't be
    /// known to any registry.
    pub fn from_file( path: &str, file: DeviceFile, capabilities: Capabilities, config: &Config ) -> Self {
        let session = Session::new( path, Weak::new(), config, None );
        session.0.state.lock().install( file, capabilities );
        session
    }

    /// Takes over an already open descriptor in place of opening the path.
    pub(crate) fn adopt( &self, file: DeviceFile, capabilities: Capabilities ) -> Result< (), Error > {
        let mut state = self.0.state.lock();
        if state.disconnected {
            return Err( Error::Disconnected );
        }

        state.reset();
        state.install( file, capabilities );
        state.open_error = None;
        if state.mode == Mode::EventLoop {
            self.register_watch( &mut state )?;
        }

        Ok(())
    }

    pub(crate) fn downgrade( &self ) -> Weak< SessionObject > {
        Arc::downgrade( &self.0 )
    }

    /// Whether both handles refer to the same session.
    pub fn ptr_eq( &self, other: &Session ) -> bool {
        Arc::ptr_eq( &self.0, &other.0 )
    }

    /// The number of live handles to this session.
    pub fn ref_count( &self ) -> usize {
        Arc::strong_count( &self.0 )
    }

    pub fn path( &self ) -> &str {
        &self.0.path
    }

    pub fn is_ready( &self ) -> bool {
        self.0.state.lock().capabilities.is_some()
    }

    pub fn is_open( &self ) -> bool {
        self.0.state.lock().file.is_some()
    }

    pub fn is_disconnected( &self ) -> bool {
        self.0.state.lock().disconnected
    }

    /// Why the last attempt to open the device failed.
    pub fn open_error( &self ) -> Option< Error > {
        self.0.state.lock().open_error.clone()
    }

    /// Closes the device if it was open and opens it again, refreshing its capabilities.
    pub fn reopen( &self ) -> Result< (), Error > {
        let mut state = self.0.state.lock();
        if state.disconnected {
            return Err( Error::Disconnected );
        }

        let result = self.open_locked( &mut state );
        state.open_error = result.clone().err();
        result
    }

    fn open_locked( &self, state: &mut SessionState ) -> Result< (), Error > {
        state.reset();
        if self.0.path.is_empty() {
            return Err( Error::NoDeviceName );
        }

        let file = DeviceFile::open( Path::new( &self.0.path ) )?;
        let capabilities = device::probe( &file )?;
        debug!(
            "Opened {}: '{}' with {} axes and {} buttons",
            self.0.path,
            capabilities.name,
            capabilities.axis_count,
            capabilities.button_count
        );

        state.install( file, capabilities );
        if state.mode == Mode::EventLoop {
            self.register_watch( state )?;
        }

        Ok(())
    }

    fn register_watch( &self, state: &mut SessionState ) -> Result< (), Error > {
        let reactor = state.reactor.clone().ok_or( Error::NoReactor )?;
        let fd = match state.file {
            Some( ref file ) => file.as_raw_fd(),
            None => return Ok(())
        };

        let session = self.downgrade();
        let id = reactor.watch( fd, Box::new( move |readiness: Readiness| {
            match session.upgrade() {
                Some( session ) => Session( session ).dispatch( readiness ),
                None => false
            }
        })).map_err( |error| Error::from_io( error, |errno| Error::WatchFailure { errno } ) )?;

        state.watch = Some( id );
        Ok(())
    }

    /// Sets the reactor used in the event loop mode. If the session is already
    /// in that mode it's moved over to the new reactor.
    pub fn set_reactor( &self, reactor: Arc< dyn Reactor > ) -> Result< (), Error > {
        let mut state = self.0.state.lock();
        state.cancel_watch();
        state.reactor = Some( reactor );
        if state.mode == Mode::EventLoop {
            self.register_watch( &mut state )?;
        }

        Ok(())
    }

    pub fn mode( &self ) -> Mode {
        self.0.state.lock().mode
    }

    /// Switches between caller-driven and reactor-driven decoding.
    pub fn set_mode( &self, mode: Mode ) -> Result< (), Error > {
        let mut state = self.0.state.lock();
        if state.mode == mode {
            return Ok(());
        }

        match mode {
            Mode::Manual => {
                state.cancel_watch();
            },
            Mode::EventLoop => {
                if state.reactor.is_none() {
                    return Err( Error::NoReactor );
                }
                self.register_watch( &mut state )?;
            }
        }

        debug!( "Switched {} to {:?} mode", self.0.path, mode );
        state.mode = mode;
        Ok(())
    }

    /// Handles readiness reported by a reactor; returns whether the watch should be kept.
    pub fn dispatch( &self, readiness: Readiness ) -> bool {
        if readiness.readable {
            self.iteration();
        }

        if readiness.hangup || readiness.error {
            self.disconnect();
            return false;
        }

        true
    }

    /// Reads and decodes a single event record, emitting at most one notification.
    ///
    /// Read errors (including there being no data to read) are not reported.
    pub fn iteration( &self ) -> Option< Event > {
        let mut state = self.0.state.lock();
        let result = match state.file {
            Some( ref file ) => file.read_event(),
            None => return None
        };

        match result {
            Ok( raw ) => {
                trace!( "{}: {:?}", self.0.path, raw );
                let event = state.handle_event( raw )?;
                state.emit( event );
                Some( event )
            },
            Err( ReadError::WouldBlock ) => None,
            Err( error ) => {
                debug!( "Failed to read an event from {}: {:?}", self.0.path, error );
                None
            }
        }
    }

    fn step( &self, timeout_ms: i32 ) -> Step {
        let mut state = self.0.state.lock();
        let result = match state.file {
            Some( ref file ) => file.read_event(),
            None => return Step::Closed
        };

        match result {
            Ok( raw ) => {
                trace!( "{}: {:?}", self.0.path, raw );
                if let Some( event ) = state.handle_event( raw ) {
                    state.emit( event );
                }
                Step::Decoded
            },
            Err( ReadError::WouldBlock ) => {
                let file = match state.file {
                    Some( ref file ) => file,
                    None => return Step::Closed
                };

                match file.poll( timeout_ms ) {
                    Ok( readiness ) if readiness.hangup || readiness.error => Step::Hangup,
                    Ok( _ ) => Step::Idle,
                    Err( error ) => Step::Failed( error.raw_os_error().unwrap_or( libc::EIO ) )
                }
            },
            Err( ReadError::ShortRead( count ) ) => {
                debug!( "Short read of {} bytes from {}", count, self.0.path );
                Step::Idle
            },
            Err( error ) if error.is_disconnect() => Step::Hangup,
            Err( ReadError::Os( errno ) ) => Step::Failed( errno ),
            Err( _ ) => Step::Idle
        }
    }

    /// Reads and decodes events until the device is closed or goes away.
    ///
    /// Does nothing in the event loop mode.
    pub fn run_loop( &self ) -> Result< (), Error > {
        self.run_loop_while( &AtomicBool::new( true ) )
    }

    /// Like `run_loop`, but also returns once `running` is cleared.
    pub fn run_loop_while( &self, running: &AtomicBool ) -> Result< (), Error > {
        if self.mode() == Mode::EventLoop {
            warn!( "Refusing to run a blocking loop on {} while it's in the event loop mode", self.0.path );
            return Ok(());
        }

        while running.load( Ordering::SeqCst ) {
            match self.step( LOOP_WAKEUP_MS ) {
                Step::Decoded | Step::Idle => continue,
                Step::Closed => break,
                Step::Hangup => {
                    self.disconnect();
                    break;
                },
                Step::Failed( errno ) => return Err( Error::ReadFailure { errno } )
            }
        }

        Ok(())
    }

    /// Checks whether the device hung up; if it did the session is disconnected.
    ///
    /// Returns whether the device is still connected.
    pub fn check_connection( &self ) -> bool {
        let readiness = {
            let state = self.0.state.lock();
            if state.disconnected {
                return false;
            }

            match state.file {
                Some( ref file ) => file.poll( 0 ),
                None => return false
            }
        };

        match readiness {
            Ok( readiness ) if readiness.hangup || readiness.error => {
                self.disconnect();
                false
            },
            _ => true
        }
    }

    /// Moves the session into its terminal state: it's removed from the registry,
    /// the device is closed and `Event::Disconnected` is emitted.
    pub fn disconnect( &self ) {
        let subscribers = {
            let mut state = self.0.state.lock();
            if state.disconnected {
                return;
            }

            state.reset();
            state.disconnected = true;
            state.mode = Mode::Manual;
            std::mem::replace( &mut state.subscribers, Vec::new() )
        };

        debug!( "{} was disconnected", self.0.path );
        if let Some( registry ) = self.0.registry.upgrade() {
            registry.forget( &self.0.path, Arc::as_ptr( &self.0 ) );
        }

        for subscriber in subscribers {
            let _ = subscriber.send( Event::Disconnected );
        }
    }

    /// Returns a channel over which every further notification of this session will be delivered.
    pub fn subscribe( &self ) -> flume::Receiver< Event > {
        let (tx, rx) = flume::unbounded();
        let mut state = self.0.state.lock();
        if state.disconnected {
            let _ = tx.send( Event::Disconnected );
        } else {
            state.subscribers.push( tx );
        }

        rx
    }

    pub fn axis_interval( &self ) -> u32 {
        self.0.state.lock().axis_interval_ms
    }

    /// Sets the minimum interval between two events of the same axis, in milliseconds.
    pub fn set_axis_interval( &self, interval_ms: u32 ) {
        self.0.state.lock().axis_interval_ms = interval_ms;
    }

    pub fn set_axis_throttle( &self, throttle: AxisThrottle ) {
        self.0.state.lock().axis_throttle = throttle;
    }

    pub fn axis_count( &self ) -> Result< u8, Error > {
        Ok( self.0.state.lock().capabilities()?.axis_count )
    }

    pub fn button_count( &self ) -> Result< u8, Error > {
        Ok( self.0.state.lock().capabilities()?.button_count )
    }

    /// The identity string reported by the kernel, usually a manufacturer followed by a model name.
    pub fn describe( &self ) -> Result< String, Error > {
        Ok( self.0.state.lock().capabilities()?.name.clone() )
    }

    pub fn descriptor( &self ) -> Result< DeviceDescriptor, Error > {
        let state = self.0.state.lock();
        let capabilities = state.capabilities()?;
        Ok( DeviceDescriptor {
            path: self.0.path.clone(),
            name: capabilities.name.clone(),
            axis_count: capabilities.axis_count,
            button_count: capabilities.button_count
        })
    }

    pub fn axis_type( &self, axis: u8 ) -> Result< AxisKind, Error > {
        let state = self.0.state.lock();
        let capabilities = state.capabilities()?;
        capabilities.axis_kind( axis ).ok_or( Error::IndexOutOfRange { index: axis, count: capabilities.axis_count } )
    }

    pub fn button_type( &self, button: u8 ) -> Result< ButtonKind, Error > {
        let state = self.0.state.lock();
        let capabilities = state.capabilities()?;
        capabilities.button_kind( button ).ok_or( Error::IndexOutOfRange { index: button, count: capabilities.button_count } )
    }

    /// A human-readable label of the given axis, e.g. "Throttle".
    pub fn describe_axis( &self, axis: u8 ) -> Result< &'static str, Error > {
        self.axis_type( axis ).map( AxisKind::name )
    }

    /// A human-readable label of the given button, e.g. "Trigger".
    pub fn describe_button( &self, button: u8 ) -> Result< &'static str, Error > {
        self.button_type( button ).map( ButtonKind::name )
    }

    /// The last value reported for the given axis.
    pub fn axis_value( &self, axis: u8 ) -> Result< i16, Error > {
        let state = self.0.state.lock();
        let count = state.capabilities()?.axis_count;
        state.axis_values.get( axis as usize ).copied().ok_or( Error::IndexOutOfRange { index: axis, count } )
    }

    /// Whether the given button was last reported as pressed.
    pub fn button_value( &self, button: u8 ) -> Result< bool, Error > {
        let state = self.0.state.lock();
        let count = state.capabilities()?.button_count;
        state.button_values.get( button as usize ).copied().ok_or( Error::IndexOutOfRange { index: button, count } )
    }

    /// Finds the first axis of the given type.
    pub fn axis_of_type( &self, kind: AxisKind ) -> Result< u8, Error > {
        let state = self.0.state.lock();
        let capabilities = state.capabilities()?;
        (0..capabilities.axis_count)
            .find( |&index| capabilities.axis_kind( index ) == Some( kind ) )
            .ok_or( Error::NotFound )
    }

    /// Finds the first button of the given type.
    pub fn button_of_type( &self, kind: ButtonKind ) -> Result< u8, Error > {
        let state = self.0.state.lock();
        let capabilities = state.capabilities()?;
        (0..capabilities.button_count)
            .find( |&index| capabilities.button_kind( index ) == Some( kind ) )
            .ok_or( Error::NotFound )
    }
}
