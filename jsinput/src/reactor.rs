use {
    parking_lot::{
        Mutex
    },
    std::{
        collections::{
            HashMap
        },
        os::unix::{
            io::{
                RawFd
            }
        },
        sync::{
            atomic::{
                AtomicU64,
                Ordering
            }
        },
        time::{
            Duration
        }
    }
};

/// What a readiness poller observed on a descriptor.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct Readiness {
    pub readable: bool,
    pub hangup: bool,
    pub error: bool
}

impl Readiness {
    pub fn from_revents( revents: libc::c_short ) -> Self {
        Readiness {
            readable: revents & libc::POLLIN != 0,
            hangup: revents & libc::POLLHUP != 0,
            error: revents & (libc::POLLERR | libc::POLLNVAL) != 0
        }
    }

    pub fn is_empty( &self ) -> bool {
        !self.readable && !self.hangup && !self.error
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct WatchId( u64 );

/// Called every time a watched descriptor becomes ready; returning `false` drops the watch.
pub type Handler = Box< dyn FnMut( Readiness ) -> bool + Send >;

/// A readiness poller owned by whatever event loop the application runs.
///
/// Watches are registered for readability, hangup and errors. Implementations
/// must not hold any of their own locks while a handler runs, since handlers
/// are allowed to add and remove watches.
pub trait Reactor: Send + Sync {
    fn watch( &self, fd: RawFd, handler: Handler ) -> std::io::Result< WatchId >;
    fn unwatch( &self, id: WatchId );
}

struct Watch {
    fd: RawFd,
    // `None` while the handler is running.
    handler: Option< Handler >
}

/// A minimal `poll(2)` based reactor.
pub struct Poller {
    next_id: AtomicU64,
    watches: Mutex< HashMap< WatchId, Watch > >
}

impl Default for Poller {
    fn default() -> Self {
        Poller::new()
    }
}

impl Poller {
    pub fn new() -> Self {
        Poller {
            next_id: AtomicU64::new( 1 ),
            watches: Mutex::new( HashMap::new() )
        }
    }

    /// The number of active watches.
    pub fn len( &self ) -> usize {
        self.watches.lock().len()
    }

    pub fn is_empty( &self ) -> bool {
        self.len() == 0
    }

    /// Waits up to `timeout` for any of the watched descriptors to become ready
    /// and runs the handler of each ready descriptor once.
    ///
    /// Returns the number of handlers which were run.
    pub fn poll_once( &self, timeout: Duration ) -> std::io::Result< usize > {
        let (ids, mut pollfds): (Vec< WatchId >, Vec< libc::pollfd >) = {
            let watches = self.watches.lock();
            watches.iter()
                .filter( |(_, watch)| watch.handler.is_some() )
                .map( |(&id, watch)| (id, libc::pollfd {
                    fd: watch.fd,
                    events: libc::POLLIN,
                    revents: 0
                }))
                .unzip()
        };

        let timeout = std::cmp::min( timeout.as_millis(), libc::c_int::max_value() as u128 ) as libc::c_int;
        let result = unsafe {
            libc::poll( pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout )
        };

        if result < 0 {
            let error = std::io::Error::last_os_error();
            if error.raw_os_error() == Some( libc::EINTR ) {
                return Ok( 0 );
            }
            return Err( error );
        }

        let mut dispatched = 0;
        for (id, pollfd) in ids.into_iter().zip( pollfds ) {
            let readiness = Readiness::from_revents( pollfd.revents );
            if readiness.is_empty() {
                continue;
            }

            let handler = self.watches.lock().get_mut( &id ).and_then( |watch| watch.handler.take() );
            let mut handler = match handler {
                Some( handler ) => handler,
                // Removed by a handler which ran before this one.
                None => continue
            };

            let keep = handler( readiness );
            dispatched += 1;

            let mut watches = self.watches.lock();
            if keep {
                if let Some( watch ) = watches.get_mut( &id ) {
                    watch.handler = Some( handler );
                }
            } else {
                watches.remove( &id );
            }
        }

        Ok( dispatched )
    }
}

impl Reactor for Poller {
    fn watch( &self, fd: RawFd, handler: Handler ) -> std::io::Result< WatchId > {
        if fd < 0 {
            return Err( std::io::Error::from_raw_os_error( libc::EBADF ) );
        }

        let id = WatchId( self.next_id.fetch_add( 1, Ordering::Relaxed ) );
        trace!( "Watching fd {} as {:?}", fd, id );
        self.watches.lock().insert( id, Watch {
            fd,
            handler: Some( handler )
        });

        Ok( id )
    }

    fn unwatch( &self, id: WatchId ) {
        trace!( "Unwatching {:?}", id );
        self.watches.lock().remove( &id );
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;

    pub(crate) fn pipe() -> (RawFd, RawFd) {
        let mut fds = [0; 2];
        let result = unsafe { libc::pipe2( fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC ) };
        assert_eq!( result, 0 );
        (fds[ 0 ], fds[ 1 ])
    }

    pub(crate) fn write_all( fd: RawFd, data: &[u8] ) {
        let count = unsafe { libc::write( fd, data.as_ptr() as *const libc::c_void, data.len() ) };
        assert_eq!( count, data.len() as isize );
    }

    pub(crate) fn close( fd: RawFd ) {
        unsafe {
            libc::close( fd );
        }
    }

    #[test]
    fn test_poller_dispatches_readable_descriptors() {
        use std::sync::atomic::AtomicUsize;

        let poller = Poller::new();
        let (rx, tx) = pipe();
        let hits = Arc::new( AtomicUsize::new( 0 ) );

        let counter = hits.clone();
        poller.watch( rx, Box::new( move |readiness| {
            assert!( readiness.readable );
            counter.fetch_add( 1, Ordering::SeqCst );
            let mut buffer = [0_u8; 16];
            unsafe { libc::read( rx, buffer.as_mut_ptr() as *mut libc::c_void, buffer.len() ) };
            true
        })).unwrap();

        assert_eq!( poller.poll_once( Duration::from_millis( 0 ) ).unwrap(), 0 );
        write_all( tx, b"x" );
        assert_eq!( poller.poll_once( Duration::from_millis( 100 ) ).unwrap(), 1 );
        assert_eq!( hits.load( Ordering::SeqCst ), 1 );
        assert_eq!( poller.len(), 1 );

        close( tx );
        close( rx );
    }

    #[test]
    fn test_poller_drops_watch_when_handler_returns_false() {
        let poller = Poller::new();
        let (rx, tx) = pipe();

        poller.watch( rx, Box::new( |_| false ) ).unwrap();
        write_all( tx, b"x" );
        assert_eq!( poller.poll_once( Duration::from_millis( 100 ) ).unwrap(), 1 );
        assert!( poller.is_empty() );

        close( tx );
        close( rx );
    }

    #[test]
    fn test_poller_reports_hangup() {
        let poller = Poller::new();
        let (rx, tx) = pipe();
        let seen = Arc::new( Mutex::new( None ) );

        let slot = seen.clone();
        poller.watch( rx, Box::new( move |readiness| {
            *slot.lock() = Some( readiness );
            false
        })).unwrap();

        close( tx );
        assert_eq!( poller.poll_once( Duration::from_millis( 100 ) ).unwrap(), 1 );
        let readiness = ( *seen.lock() ).unwrap();
        assert!( readiness.hangup );

        close( rx );
    }

    #[test]
    fn test_poller_handler_can_unwatch_itself() {
        let poller = Arc::new( Poller::new() );
        let (rx, tx) = pipe();
        let id = Arc::new( Mutex::new( None ) );

        let handle = poller.clone();
        let own_id = id.clone();
        let watch = poller.watch( rx, Box::new( move |_| {
            if let Some( id ) = *own_id.lock() {
                handle.unwatch( id );
            }
            true
        })).unwrap();
        *id.lock() = Some( watch );

        write_all( tx, b"x" );
        assert_eq!( poller.poll_once( Duration::from_millis( 100 ) ).unwrap(), 1 );
        assert!( poller.is_empty() );

        close( tx );
        close( rx );
    }
}
