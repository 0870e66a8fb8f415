use {
    crate::{
        DeviceChange,
        DeviceDescriptor,
        Error,
        enumerate::{
            is_joystick_name,
            Enumerator
        },
        reactor::{
            Reactor,
            Readiness,
            WatchId
        },
        registry::{
            Registry
        },
        session::{
            Session
        }
    },
    parking_lot::{
        Mutex
    },
    std::{
        os::unix::{
            io::{
                AsRawFd,
                RawFd
            }
        },
        sync::{
            Arc,
            Weak
        }
    }
};

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Action {
    Add,
    Remove,
    Other
}

/// A device notification, independent of where it came from.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct HotplugNotice {
    pub action: Action,
    pub subsystem: String,
    pub sysname: String,
    pub devnode: Option< String >
}

impl HotplugNotice {
    pub fn from_udev( event: &udev::Event ) -> Self {
        let action = match event.event_type() {
            udev::EventType::Add => Action::Add,
            udev::EventType::Remove => Action::Remove,
            _ => Action::Other
        };

        let device = event.device();
        HotplugNotice {
            action,
            subsystem: device.subsystem().map( |subsystem| subsystem.to_string_lossy().into_owned() ).unwrap_or_default(),
            sysname: device.sysname().to_string_lossy().into_owned(),
            devnode: device.devnode().map( |path| path.to_string_lossy().into_owned() )
        }
    }
}

struct Entry {
    descriptor: DeviceDescriptor,
    session: Session
}

/// The live collection of attached joysticks, in the order they appeared.
///
/// Holds a reference to every listed session; a path is never listed twice.
pub struct DeviceList {
    registry: Registry,
    entries: Vec< Entry >,
    subscribers: Vec< flume::Sender< DeviceChange > >
}

impl DeviceList {
    pub fn new( registry: &Registry ) -> Self {
        DeviceList {
            registry: registry.clone(),
            entries: Vec::new(),
            subscribers: Vec::new()
        }
    }

    /// Adds already opened devices without notifying anyone.
    pub fn seed( &mut self, devices: Vec< (DeviceDescriptor, Session) > ) {
        for (descriptor, session) in devices {
            if self.get( &descriptor.path ).is_some() {
                continue;
            }

            self.entries.push( Entry { descriptor, session } );
        }
    }

    /// Updates the list according to a notification; returns what changed, if anything.
    pub fn apply( &mut self, notice: &HotplugNotice ) -> Option< DeviceChange > {
        if notice.subsystem != "input" || !is_joystick_name( &notice.sysname ) {
            return None;
        }

        let path = notice.devnode.as_ref()?;
        match notice.action {
            Action::Add => self.insert( path ),
            Action::Remove => self.remove( path ),
            Action::Other => None
        }
    }

    /// Opens the device at `path` and appends it to the list.
    pub fn insert( &mut self, path: &str ) -> Option< DeviceChange > {
        if self.get( path ).is_some() {
            debug!( "{} is already listed", path );
            return None;
        }

        let session = self.registry.open( path );
        let descriptor = match session.descriptor() {
            Ok( descriptor ) => descriptor,
            Err( error ) => {
                let error = session.open_error().unwrap_or( error );
                warn!( "Ignoring newly attached {}: {}", path, error );
                return None;
            }
        };

        debug!( "Joystick attached: {} ('{}')", path, descriptor.name );
        self.entries.push( Entry {
            descriptor: descriptor.clone(),
            session
        });

        Some( self.emit( DeviceChange::Added( descriptor ) ) )
    }

    /// Drops the device at `path` from the list.
    pub fn remove( &mut self, path: &str ) -> Option< DeviceChange > {
        let position = self.entries.iter().position( |entry| entry.descriptor.path == path )?;
        let entry = self.entries.remove( position );

        debug!( "Joystick detached: {}", path );
        self.registry.release( entry.session );
        Some( self.emit( DeviceChange::Removed( entry.descriptor ) ) )
    }

    fn emit( &mut self, change: DeviceChange ) -> DeviceChange {
        self.subscribers.retain( |subscriber| subscriber.send( change.clone() ).is_ok() );
        change
    }

    pub fn devices( &self ) -> Vec< DeviceDescriptor > {
        self.entries.iter().map( |entry| entry.descriptor.clone() ).collect()
    }

    pub fn sessions( &self ) -> Vec< Session > {
        self.entries.iter().map( |entry| entry.session.clone() ).collect()
    }

    pub fn get( &self, path: &str ) -> Option< Session > {
        self.entries.iter()
            .find( |entry| entry.descriptor.path == path )
            .map( |entry| entry.session.clone() )
    }

    pub fn len( &self ) -> usize {
        self.entries.len()
    }

    pub fn is_empty( &self ) -> bool {
        self.entries.is_empty()
    }

    pub fn subscribe( &mut self ) -> flume::Receiver< DeviceChange > {
        let (tx, rx) = flume::unbounded();
        self.subscribers.push( tx );
        rx
    }
}

/// Where a `HotplugWatcher` gets its notifications from.
///
/// The descriptor must become readable whenever `next_notice` has something to return.
pub trait NoticeSource: AsRawFd + Send {
    /// Returns the next pending notification without blocking.
    fn next_notice( &mut self ) -> Option< HotplugNotice >;
}

struct UdevSource( udev::MonitorSocket );

// The socket is only ever touched with the watcher's lock held.
unsafe impl Send for UdevSource {}

impl AsRawFd for UdevSource {
    fn as_raw_fd( &self ) -> RawFd {
        self.0.as_raw_fd()
    }
}

impl NoticeSource for UdevSource {
    fn next_notice( &mut self ) -> Option< HotplugNotice > {
        self.0.iter().next().map( |event| HotplugNotice::from_udev( &event ) )
    }
}

struct WatcherState {
    source: Box< dyn NoticeSource >,
    list: DeviceList,
    watch: Option< (Arc< dyn Reactor >, WatchId) >
}

impl Drop for WatcherState {
    fn drop( &mut self ) {
        if let Some( (reactor, id) ) = self.watch.take() {
            reactor.unwatch( id );
        }
    }
}

/// Keeps a `DeviceList` in sync with udev's notifications about input devices.
#[derive(Clone)]
pub struct HotplugWatcher( Arc< Mutex< WatcherState > > );

fn hotplug_error( error: std::io::Error ) -> Error {
    Error::from_io( error, |errno| Error::HotplugFailure { errno } )
}

impl HotplugWatcher {
    /// Starts listening for notifications and lists the devices which are already attached.
    pub fn new( enumerator: &Enumerator ) -> Result< Self, Error > {
        let socket = udev::MonitorBuilder::new()
            .and_then( |builder| builder.match_subsystem( "input" ) )
            .and_then( |builder| builder.listen() )
            .map_err( hotplug_error )?;

        let fd = socket.as_raw_fd();
        let result = unsafe {
            let flags = libc::fcntl( fd, libc::F_GETFL );
            libc::fcntl( fd, libc::F_SETFL, flags | libc::O_NONBLOCK )
        };

        if result < 0 {
            return Err( hotplug_error( std::io::Error::last_os_error() ) );
        }

        HotplugWatcher::with_source( enumerator, Box::new( UdevSource( socket ) ) )
    }

    /// Like `new`, but takes the notifications from `source` instead of udev.
    pub fn with_source( enumerator: &Enumerator, source: Box< dyn NoticeSource > ) -> Result< Self, Error > {
        let mut list = DeviceList::new( enumerator.registry() );
        list.seed( enumerator.open_all()? );
        debug!( "Watching for hotplug events; {} joystick(s) attached", list.len() );

        Ok( HotplugWatcher( Arc::new( Mutex::new( WatcherState {
            source,
            list,
            watch: None
        }))))
    }

    /// Handles a single pending notification; returns `false` if there was none.
    pub fn process_one( &self ) -> bool {
        let mut state = self.0.lock();
        let notice = match state.source.next_notice() {
            Some( notice ) => notice,
            None => return false
        };

        trace!( "Hotplug notice: {:?}", notice );
        state.list.apply( &notice );
        true
    }

    /// Handles every pending notification; returns what changed.
    pub fn process( &self ) -> Vec< DeviceChange > {
        let mut state = self.0.lock();
        let mut changes = Vec::new();
        while let Some( notice ) = state.source.next_notice() {
            trace!( "Hotplug notice: {:?}", notice );
            changes.extend( state.list.apply( &notice ) );
        }

        changes
    }

    /// Processes notifications whenever `reactor` reports the socket as readable.
    pub fn attach( &self, reactor: Arc< dyn Reactor > ) -> Result< (), Error > {
        let mut state = self.0.lock();
        if let Some( (old, id) ) = state.watch.take() {
            old.unwatch( id );
        }

        let watcher: Weak< Mutex< WatcherState > > = Arc::downgrade( &self.0 );
        let id = reactor.watch( state.source.as_raw_fd(), Box::new( move |readiness: Readiness| {
            let watcher = match watcher.upgrade() {
                Some( watcher ) => HotplugWatcher( watcher ),
                None => return false
            };

            if readiness.error {
                error!( "The hotplug socket failed; no longer watching for new joysticks" );
                return false;
            }

            watcher.process_one();
            true
        })).map_err( |error| Error::from_io( error, |errno| Error::WatchFailure { errno } ) )?;

        state.watch = Some( (reactor, id) );
        Ok(())
    }

    pub fn devices( &self ) -> Vec< DeviceDescriptor > {
        self.0.lock().list.devices()
    }

    pub fn sessions( &self ) -> Vec< Session > {
        self.0.lock().list.sessions()
    }

    pub fn get( &self, path: &str ) -> Option< Session > {
        self.0.lock().list.get( path )
    }

    pub fn subscribe( &self ) -> flume::Receiver< DeviceChange > {
        self.0.lock().list.subscribe()
    }

    pub fn len( &self ) -> usize {
        self.0.lock().list.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        AxisKind,
        ButtonKind,
        Capabilities,
        Config,
        DeviceFile,
        reactor::{
            Poller,
            tests::{
                close,
                pipe,
                write_all
            }
        }
    };
    use std::time::Duration;

    fn notice( action: Action, subsystem: &str, sysname: &str, devnode: Option< &str > ) -> HotplugNotice {
        HotplugNotice {
            action,
            subsystem: subsystem.to_owned(),
            sysname: sysname.to_owned(),
            devnode: devnode.map( |devnode| devnode.to_owned() )
        }
    }

    fn seeded_list( registry: &Registry, paths: &[&str] ) -> (DeviceList, Vec< std::os::unix::io::RawFd >) {
        let mut writers = Vec::new();
        let mut devices = Vec::new();
        for path in paths {
            let (rx, tx) = pipe();
            writers.push( tx );

            let capabilities = Capabilities::new( "Stick", &[ AxisKind::X, AxisKind::Y ], &[ ButtonKind::TRIGGER ] );
            let session = Session::from_file( path, unsafe { DeviceFile::from_raw_fd( rx ) }, capabilities, &Config::default() );
            devices.push( (session.descriptor().unwrap(), session) );
        }

        let mut list = DeviceList::new( registry );
        list.seed( devices );
        (list, writers)
    }

    #[test]
    fn test_irrelevant_notices_are_ignored() {
        let registry = Registry::new( Config::default() );
        let (mut list, _writers) = seeded_list( &registry, &[ "/dev/input/js0" ] );
        let changes = list.subscribe();

        assert_eq!( list.apply( &notice( Action::Remove, "usb", "js0", Some( "/dev/input/js0" ) ) ), None );
        assert_eq!( list.apply( &notice( Action::Remove, "input", "event0", Some( "/dev/input/js0" ) ) ), None );
        assert_eq!( list.apply( &notice( Action::Remove, "input", "js0", None ) ), None );
        assert_eq!( list.apply( &notice( Action::Other, "input", "js0", Some( "/dev/input/js0" ) ) ), None );
        assert_eq!( list.len(), 1 );
        assert!( changes.try_recv().is_err() );
    }

    #[test]
    fn test_remove_notice() {
        let registry = Registry::new( Config::default() );
        let (mut list, _writers) = seeded_list( &registry, &[ "/dev/input/js0", "/dev/input/js1" ] );
        let changes = list.subscribe();
        let session = list.get( "/dev/input/js1" ).unwrap();
        assert_eq!( session.ref_count(), 2 );

        let change = list.apply( &notice( Action::Remove, "input", "js1", Some( "/dev/input/js1" ) ) ).unwrap();
        match change {
            DeviceChange::Removed( ref descriptor ) => assert_eq!( descriptor.path, "/dev/input/js1" ),
            ref change => panic!( "unexpected change: {:?}", change )
        }

        assert_eq!( changes.try_recv(), Ok( change ) );
        assert_eq!( session.ref_count(), 1 );
        assert_eq!( list.devices().len(), 1 );
        assert_eq!( list.devices()[ 0 ].path, "/dev/input/js0" );

        // Removing it again does nothing.
        assert_eq!( list.apply( &notice( Action::Remove, "input", "js1", Some( "/dev/input/js1" ) ) ), None );
        assert!( changes.try_recv().is_err() );
    }

    #[test]
    fn test_duplicate_add_is_ignored() {
        let registry = Registry::new( Config::default() );
        let (mut list, _writers) = seeded_list( &registry, &[ "/dev/input/js0" ] );
        list.seed( vec![] );

        assert_eq!( list.apply( &notice( Action::Add, "input", "js0", Some( "/dev/input/js0" ) ) ), None );
        assert_eq!( list.len(), 1 );
        // The listed session was kept; nothing went through the registry.
        assert!( registry.is_empty() );
    }

    #[test]
    fn test_add_of_an_unusable_device_is_skipped() {
        let registry = Registry::new( Config::default() );
        let mut list = DeviceList::new( &registry );
        let changes = list.subscribe();

        assert_eq!( list.apply( &notice( Action::Add, "input", "js7", Some( "/nonexistent/js7" ) ) ), None );
        assert!( list.is_empty() );
        assert!( registry.is_empty() );
        assert!( changes.try_recv().is_err() );
    }

    #[test]
    fn test_seed_keeps_paths_unique() {
        let registry = Registry::new( Config::default() );
        let (mut list, _writers) = seeded_list( &registry, &[ "/dev/input/js0", "/dev/input/js1" ] );
        let (duplicates, _more_writers) = seeded_list( &registry, &[ "/dev/input/js1", "/dev/input/js2" ] );
        let duplicates = duplicates.entries.into_iter().map( |entry| (entry.descriptor, entry.session) ).collect();

        list.seed( duplicates );
        let paths: Vec< _ > = list.devices().into_iter().map( |device| device.path ).collect();
        assert_eq!( paths, vec![ "/dev/input/js0", "/dev/input/js1", "/dev/input/js2" ] );
        assert_eq!( list.sessions().len(), 3 );
    }

    fn stick() -> Capabilities {
        Capabilities::new( "Stick", &[ AxisKind::X, AxisKind::Y ], &[ ButtonKind::TRIGGER ] )
    }

    /// Registers a ready session for `path` which reads from a pipe; returns it along with the pipe's writing end.
    fn attached( registry: &Registry, path: &str ) -> (Session, RawFd) {
        let (rx, tx) = pipe();
        let session = registry.adopt( path, unsafe { DeviceFile::from_raw_fd( rx ) }, stick() ).unwrap();
        (session, tx)
    }

    /// Hands out queued notices; the pipe carries one byte per notice.
    struct QueuedNotices {
        rx: RawFd,
        notices: flume::Receiver< HotplugNotice >
    }

    impl AsRawFd for QueuedNotices {
        fn as_raw_fd( &self ) -> RawFd {
            self.rx
        }
    }

    impl NoticeSource for QueuedNotices {
        fn next_notice( &mut self ) -> Option< HotplugNotice > {
            let mut byte = 0_u8;
            let count = unsafe { libc::read( self.rx, &mut byte as *mut u8 as *mut libc::c_void, 1 ) };
            if count != 1 {
                return None;
            }

            self.notices.try_recv().ok()
        }
    }

    impl Drop for QueuedNotices {
        fn drop( &mut self ) {
            close( self.rx );
        }
    }

    struct NoticeQueue {
        tx: RawFd,
        notices: flume::Sender< HotplugNotice >
    }

    impl NoticeQueue {
        fn push( &self, notice: HotplugNotice ) {
            self.notices.send( notice ).unwrap();
            write_all( self.tx, b"n" );
        }
    }

    impl Drop for NoticeQueue {
        fn drop( &mut self ) {
            close( self.tx );
        }
    }

    fn notice_queue() -> (NoticeQueue, Box< dyn NoticeSource >) {
        let (rx, tx) = pipe();
        let (sender, receiver) = flume::unbounded();
        (NoticeQueue { tx, notices: sender }, Box::new( QueuedNotices { rx, notices: receiver } ))
    }

    fn paths( devices: Vec< DeviceDescriptor > ) -> Vec< String > {
        devices.into_iter().map( |device| device.path ).collect()
    }

    #[test]
    fn test_add_notice_lists_the_device_in_order() {
        let registry = Registry::new( Config::default() );
        let (js0, tx0) = attached( &registry, "/dev/input/js0" );
        let (js1, tx1) = attached( &registry, "/dev/input/js1" );
        let mut list = DeviceList::new( &registry );
        let changes = list.subscribe();

        let change = list.apply( &notice( Action::Add, "input", "js1", Some( "/dev/input/js1" ) ) ).unwrap();
        match change {
            DeviceChange::Added( ref device ) => {
                assert_eq!( device.path, "/dev/input/js1" );
                assert_eq!( device.name, "Stick" );
                assert_eq!( device.axis_count, 2 );
                assert_eq!( device.button_count, 1 );
            },
            ref change => panic!( "unexpected change: {:?}", change )
        }
        assert_eq!( changes.try_recv(), Ok( change ) );

        assert!( list.apply( &notice( Action::Add, "input", "js0", Some( "/dev/input/js0" ) ) ).is_some() );
        assert_eq!( paths( list.devices() ), vec![ "/dev/input/js1", "/dev/input/js0" ] );
        assert!( list.get( "/dev/input/js0" ).unwrap().ptr_eq( &js0 ) );
        assert_eq!( js1.ref_count(), 2 );

        match list.apply( &notice( Action::Remove, "input", "js1", Some( "/dev/input/js1" ) ) ) {
            Some( DeviceChange::Removed( ref device ) ) => assert_eq!( device.path, "/dev/input/js1" ),
            change => panic!( "unexpected change: {:?}", change )
        }

        match changes.try_recv() {
            Ok( DeviceChange::Added( ref device ) ) => assert_eq!( device.path, "/dev/input/js0" ),
            change => panic!( "unexpected change: {:?}", change )
        }
        match changes.try_recv() {
            Ok( DeviceChange::Removed( ref device ) ) => assert_eq!( device.path, "/dev/input/js1" ),
            change => panic!( "unexpected change: {:?}", change )
        }

        assert_eq!( js1.ref_count(), 1 );
        assert_eq!( paths( list.devices() ), vec![ "/dev/input/js0" ] );

        close( tx0 );
        close( tx1 );
    }

    #[test]
    fn test_watcher_follows_notices_dispatched_by_the_poller() {
        let directory = tempfile::tempdir().unwrap();
        let registry = Registry::new( Config::default() );
        let enumerator = Enumerator::with_directory( &registry, directory.path() );
        let (queue, source) = notice_queue();
        let watcher = HotplugWatcher::with_source( &enumerator, source ).unwrap();
        assert_eq!( watcher.len(), 0 );

        let changes = watcher.subscribe();
        let poller = Arc::new( Poller::new() );
        watcher.attach( poller.clone() ).unwrap();
        assert_eq!( poller.len(), 1 );

        let (js0, tx0) = attached( &registry, "/dev/input/js0" );
        assert_eq!( poller.poll_once( Duration::from_millis( 0 ) ).unwrap(), 0 );

        queue.push( notice( Action::Add, "input", "js0", Some( "/dev/input/js0" ) ) );
        assert_eq!( poller.poll_once( Duration::from_millis( 100 ) ).unwrap(), 1 );
        match changes.try_recv() {
            Ok( DeviceChange::Added( ref device ) ) => assert_eq!( device.path, "/dev/input/js0" ),
            change => panic!( "unexpected change: {:?}", change )
        }
        assert!( watcher.get( "/dev/input/js0" ).unwrap().ptr_eq( &js0 ) );

        // One notice per wakeup; the one for a non-joystick changes nothing.
        queue.push( notice( Action::Add, "input", "mouse0", Some( "/dev/input/mouse0" ) ) );
        queue.push( notice( Action::Remove, "input", "js0", Some( "/dev/input/js0" ) ) );
        assert_eq!( poller.poll_once( Duration::from_millis( 100 ) ).unwrap(), 1 );
        assert!( changes.try_recv().is_err() );
        assert_eq!( watcher.len(), 1 );

        assert_eq!( poller.poll_once( Duration::from_millis( 100 ) ).unwrap(), 1 );
        match changes.try_recv() {
            Ok( DeviceChange::Removed( ref device ) ) => assert_eq!( device.path, "/dev/input/js0" ),
            change => panic!( "unexpected change: {:?}", change )
        }
        assert!( watcher.devices().is_empty() );
        assert_eq!( js0.ref_count(), 1 );
        assert_eq!( poller.poll_once( Duration::from_millis( 0 ) ).unwrap(), 0 );

        std::mem::drop( watcher );
        assert!( poller.is_empty() );
        close( tx0 );
    }

    #[test]
    fn test_process_drains_every_pending_notice() {
        let directory = tempfile::tempdir().unwrap();
        let registry = Registry::new( Config::default() );
        let enumerator = Enumerator::with_directory( &registry, directory.path() );
        let (queue, source) = notice_queue();
        let watcher = HotplugWatcher::with_source( &enumerator, source ).unwrap();

        let (_js0, tx0) = attached( &registry, "/dev/input/js0" );
        let (_js1, tx1) = attached( &registry, "/dev/input/js1" );
        queue.push( notice( Action::Add, "input", "js0", Some( "/dev/input/js0" ) ) );
        queue.push( notice( Action::Add, "input", "js1", Some( "/dev/input/js1" ) ) );
        queue.push( notice( Action::Remove, "input", "js0", Some( "/dev/input/js0" ) ) );

        let changes = watcher.process();
        match changes.as_slice() {
            [ DeviceChange::Added( first ), DeviceChange::Added( second ), DeviceChange::Removed( third ) ] => {
                assert_eq!( first.path, "/dev/input/js0" );
                assert_eq!( second.path, "/dev/input/js1" );
                assert_eq!( third.path, "/dev/input/js0" );
            },
            changes => panic!( "unexpected changes: {:?}", changes )
        }

        assert_eq!( paths( watcher.devices() ), vec![ "/dev/input/js1" ] );
        assert!( watcher.process().is_empty() );
        assert!( !watcher.process_one() );

        queue.push( notice( Action::Remove, "input", "js1", Some( "/dev/input/js1" ) ) );
        assert!( watcher.process_one() );
        assert!( watcher.sessions().is_empty() );

        close( tx0 );
        close( tx1 );
    }
}
