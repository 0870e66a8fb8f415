use {
    crate::{
        Config,
        Error,
        device::{
            Capabilities,
            DeviceFile
        },
        reactor::{
            Reactor
        },
        session::{
            Session,
            SessionObject
        }
    },
    parking_lot::{
        Mutex
    },
    std::{
        collections::{
            HashMap
        },
        sync::{
            Arc,
            Weak
        }
    }
};

pub(crate) struct RegistryInner {
    sessions: Mutex< HashMap< String, Weak< SessionObject > > >,
    config: Config,
    reactor: Option< Arc< dyn Reactor > >
}

impl RegistryInner {
    /// Removes the entry for `path`, but only if it still points to `session`.
    pub(crate) fn forget( &self, path: &str, session: *const SessionObject ) {
        let mut sessions = self.sessions.lock();
        let is_current = sessions.get( path ).map( |entry| entry.as_ptr() == session ).unwrap_or( false );
        if is_current {
            debug!( "Forgetting {}", path );
            sessions.remove( path );
        }
    }
}

/// The canonical collection of open sessions, keyed by device path.
///
/// Every open of the same path shares a single session. Sessions are only
/// weakly referenced here; the entry goes away once the last `Session`
/// handle is dropped or the device is disconnected.
#[derive(Clone)]
pub struct Registry( Arc< RegistryInner > );

impl Registry {
    pub fn new( config: Config ) -> Self {
        Registry( Arc::new( RegistryInner {
            sessions: Mutex::new( HashMap::new() ),
            config,
            reactor: None
        }))
    }

    /// Sessions opened through this registry will be driven by `reactor`.
    pub fn with_reactor( config: Config, reactor: Arc< dyn Reactor > ) -> Self {
        Registry( Arc::new( RegistryInner {
            sessions: Mutex::new( HashMap::new() ),
            config,
            reactor: Some( reactor )
        }))
    }

    pub fn config( &self ) -> &Config {
        &self.0.config
    }

    pub fn reactor( &self ) -> Option< Arc< dyn Reactor > > {
        self.0.reactor.clone()
    }

    /// Returns the live session for `path`, opening it if there isn't one.
    ///
    /// A session which fails to open is still returned; it's not ready and
    /// `Session::open_error` tells why.
    pub fn open( &self, path: &str ) -> Session {
        let mut sessions = self.0.sessions.lock();
        if let Some( session ) = sessions.get( path ).and_then( Weak::upgrade ) {
            return Session( session );
        }

        let session = Session::new( path, Arc::downgrade( &self.0 ), &self.0.config, self.0.reactor.clone() );
        if let Err( error ) = session.reopen() {
            debug!( "Failed to open {}: {}", path, error );
        }

        sessions.insert( path.to_owned(), session.downgrade() );
        session
    }

    /// Registers a session for a descriptor which was opened and queried elsewhere.
    ///
    /// If `path` already has a live session that one is returned and `file` is closed.
    pub fn adopt( &self, path: &str, file: DeviceFile, capabilities: Capabilities ) -> Result< Session, Error > {
        if path.is_empty() {
            return Err( Error::NoDeviceName );
        }

        let mut sessions = self.0.sessions.lock();
        if let Some( session ) = sessions.get( path ).and_then( Weak::upgrade ) {
            return Ok( Session( session ) );
        }

        let session = Session::new( path, Arc::downgrade( &self.0 ), &self.0.config, self.0.reactor.clone() );
        if let Err( error ) = session.adopt( file, capabilities ) {
            // The session must not be dropped with the lock held.
            std::mem::drop( sessions );
            return Err( error );
        }

        sessions.insert( path.to_owned(), session.downgrade() );
        Ok( session )
    }

    /// Like `open`, but fails if the session isn't ready.
    pub fn try_open( &self, path: &str ) -> Result< Session, Error > {
        let session = self.open( path );
        if session.is_ready() {
            return Ok( session );
        }

        Err( session.open_error().unwrap_or( Error::NotReady ) )
    }

    /// Gives up a reference to a session.
    pub fn release( &self, session: Session ) {
        std::mem::drop( session );
    }

    /// Returns the live session for `path` without opening anything.
    pub fn get( &self, path: &str ) -> Option< Session > {
        self.0.sessions.lock().get( path ).and_then( Weak::upgrade ).map( Session )
    }

    pub fn contains( &self, path: &str ) -> bool {
        self.get( path ).is_some()
    }

    /// The number of references currently held to the session for `path`.
    pub fn ref_count( &self, path: &str ) -> usize {
        self.0.sessions.lock().get( path ).map( Weak::strong_count ).unwrap_or( 0 )
    }

    pub fn len( &self ) -> usize {
        self.0.sessions.lock().len()
    }

    pub fn is_empty( &self ) -> bool {
        self.len() == 0
    }

    pub fn paths( &self ) -> Vec< String > {
        let mut paths: Vec< _ > = self.0.sessions.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Forgets every entry; sessions which are still referenced elsewhere stay open.
    ///
    /// Returns how many of those there were.
    pub fn shutdown( &self ) -> usize {
        let sessions = std::mem::replace( &mut *self.0.sessions.lock(), HashMap::new() );
        let mut live = 0;
        for (path, session) in sessions {
            let count = session.strong_count();
            if count != 0 {
                warn!( "{} is still referenced {} time(s) at shutdown", path, count );
                live += 1;
            }
        }

        live
    }
}
