use {
    jsinput::{
        AxisThrottle,
        Config,
        DeviceChange,
        Enumerator,
        Event,
        HotplugWatcher,
        Poller,
        Registry,
        Session
    },
    std::{
        collections::{
            HashMap
        },
        fmt,
        path::{
            PathBuf
        },
        str::{
            FromStr
        },
        sync::{
            Arc,
            atomic::{
                AtomicBool,
                Ordering
            }
        },
        time::{
            Duration
        }
    }
};

static RUNNING: AtomicBool = AtomicBool::new( true );

enum RunMode {
    Monitor,
    List,
    Loop( String )
}

impl FromStr for RunMode {
    type Err = String;
    fn from_str( value: &str ) -> Result< Self, Self::Err > {
        match value {
            "monitor" => Ok( RunMode::Monitor ),
            "list" => Ok( RunMode::List ),
            _ if value.starts_with( "loop:" ) && value.len() > "loop:".len() => Ok( RunMode::Loop( value[ "loop:".len().. ].to_owned() ) ),
            _ => Err( format!( "invalid mode: '{}' (expected 'monitor', 'list' or 'loop:<path>')", value ) )
        }
    }
}

fn env_var< T >( name: &str ) -> Result< Option< T >, String > where T: FromStr, T::Err: fmt::Display {
    match std::env::var( name ) {
        Ok( value ) => value.parse().map( Some ).map_err( |error| format!( "{}: {}", name, error ) ),
        Err( _ ) => Ok( None )
    }
}

fn load_config() -> Result< (Config, RunMode), String > {
    let mut config = Config::default();
    if let Some( device_dir ) = env_var::< PathBuf >( "JSMOND_DEVICE_DIR" )? {
        config.device_dir = device_dir;
    }
    if let Some( interval ) = env_var::< u32 >( "JSMOND_AXIS_INTERVAL" )? {
        config.axis_interval_ms = interval;
    }
    if let Some( throttle ) = env_var::< AxisThrottle >( "JSMOND_AXIS_THROTTLE" )? {
        config.axis_throttle = throttle;
    }

    let mode = env_var::< RunMode >( "JSMOND_MODE" )?.unwrap_or( RunMode::Monitor );
    Ok( (config, mode) )
}

/// Axis and button labels of a session, captured once so printing doesn't need the session.
struct Labels {
    axes: Vec< &'static str >,
    buttons: Vec< &'static str >
}

impl Labels {
    fn of( session: &Session ) -> Self {
        let axes = (0..session.axis_count().unwrap_or( 0 )).map( |axis| session.describe_axis( axis ).unwrap_or( "?" ) ).collect();
        let buttons = (0..session.button_count().unwrap_or( 0 )).map( |button| session.describe_button( button ).unwrap_or( "?" ) ).collect();
        Labels { axes, buttons }
    }

    fn axis( &self, index: u8 ) -> &'static str {
        self.axes.get( index as usize ).copied().unwrap_or( "?" )
    }

    fn button( &self, index: u8 ) -> &'static str {
        self.buttons.get( index as usize ).copied().unwrap_or( "?" )
    }
}

fn describe_event( labels: &Labels, event: Event ) -> String {
    match event {
        Event::ButtonPressed( index ) => format!( "button #{} ({}) pressed", index, labels.button( index ) ),
        Event::ButtonReleased( index ) => format!( "button #{} ({}) released", index, labels.button( index ) ),
        Event::AxisMoved( index, value ) => format!( "axis #{} ({}) moved to {}", index, labels.axis( index ), value ),
        Event::Disconnected => "disconnected".to_owned()
    }
}

fn list_main( registry: &Registry ) -> Result< (), Box< dyn std::error::Error > > {
    let enumerator = Enumerator::new( registry );
    let devices = jsinput::require_devices( enumerator.list()? )?;
    for device in devices {
        println!( "{}: '{}', {} axes, {} buttons", device.path, device.name, device.axis_count, device.button_count );

        let session = match registry.try_open( &device.path ) {
            Ok( session ) => session,
            Err( error ) => {
                log::error!( "Failed to reopen {}: {}", device.path, error );
                continue;
            }
        };

        for axis in 0..device.axis_count {
            println!( "    axis #{}: {}", axis, session.describe_axis( axis )? );
        }
        for button in 0..device.button_count {
            println!( "    button #{}: {}", button, session.describe_button( button )? );
        }
    }

    Ok(())
}

fn monitor_main( registry: &Registry, poller: &Poller ) -> Result< (), Box< dyn std::error::Error > > {
    let enumerator = Enumerator::new( registry );
    let watcher = HotplugWatcher::new( &enumerator )?;
    let changes = watcher.subscribe();
    watcher.attach( registry.reactor().ok_or( jsinput::Error::NoReactor )? )?;

    let mut sessions = HashMap::new();
    for session in watcher.sessions() {
        log::info!( "Found {} ('{}')", session.path(), session.describe().unwrap_or_default() );
        sessions.insert( session.path().to_owned(), (session.subscribe(), Labels::of( &session ), session) );
    }

    if sessions.is_empty() {
        log::info!( "Waiting for joysticks..." );
    }

    while RUNNING.load( Ordering::SeqCst ) {
        poller.poll_once( Duration::from_millis( 100 ) )?;

        for change in changes.try_iter() {
            match change {
                DeviceChange::Added( device ) => {
                    log::info!( "Joystick attached: {} ('{}', {} axes, {} buttons)", device.path, device.name, device.axis_count, device.button_count );
                    if let Some( session ) = watcher.get( &device.path ) {
                        sessions.insert( device.path, (session.subscribe(), Labels::of( &session ), session) );
                    }
                },
                DeviceChange::Removed( device ) => {
                    log::info!( "Joystick detached: {} ('{}')", device.path, device.name );
                    sessions.remove( &device.path );
                }
            }
        }

        let mut gone = Vec::new();
        for (path, (events, labels, _)) in &sessions {
            for event in events.try_iter() {
                log::info!( "{}: {}", path, describe_event( labels, event ) );
                if event == Event::Disconnected {
                    gone.push( path.clone() );
                }
            }
        }

        for path in gone {
            sessions.remove( &path );
        }
    }

    Ok(())
}

fn loop_main( registry: &Registry, path: &str ) -> Result< (), Box< dyn std::error::Error > > {
    let session = registry.try_open( path )?;
    log::info!( "Reading events from {} ('{}')", path, session.describe()? );

    let events = session.subscribe();
    let labels = Labels::of( &session );
    let printer = std::thread::spawn( move || {
        // Ends once the session is gone and the channel closes.
        for event in events.iter() {
            log::info!( "{}", describe_event( &labels, event ) );
            if event == Event::Disconnected {
                break;
            }
        }
    });

    let result = session.run_loop_while( &RUNNING );
    std::mem::drop( session );
    let _ = printer.join();
    Ok( result? )
}

fn main() -> Result< (), Box< dyn std::error::Error > > {
    if std::env::var( "RUST_LOG" ).is_err() {
        std::env::set_var( "RUST_LOG", "info" );
    }

    env_logger::init();

    let (config, mode) = load_config()?;

    ctrlc::set_handler( move || {
        RUNNING.store( false, Ordering::SeqCst );
    })?;

    let poller = Arc::new( Poller::new() );
    let registry = match mode {
        RunMode::Monitor => Registry::with_reactor( config, poller.clone() ),
        _ => Registry::new( config )
    };

    let result = match mode {
        RunMode::Monitor => monitor_main( &registry, &poller ),
        RunMode::List => list_main( &registry ),
        RunMode::Loop( ref path ) => loop_main( &registry, path )
    };

    if let Err( ref error ) = result {
        log::error!( "{}", error );
    }

    let live = registry.shutdown();
    if live != 0 {
        log::warn!( "{} session(s) were still in use at exit", live );
    }

    result
}
