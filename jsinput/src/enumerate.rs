use {
    crate::{
        DeviceDescriptor,
        Error,
        registry::{
            Registry
        },
        session::{
            Session
        }
    },
    std::{
        path::{
            Path,
            PathBuf
        }
    }
};

/// Whether the file name looks like a joystick device node, i.e. `js` followed by a number.
pub fn is_joystick_name( name: &str ) -> bool {
    joystick_index( name ).is_some()
}

fn joystick_index( name: &str ) -> Option< u32 > {
    if !name.starts_with( "js" ) {
        return None;
    }

    let digits = &name[ 2.. ];
    if digits.is_empty() || !digits.bytes().all( |byte| byte.is_ascii_digit() ) {
        return None;
    }

    // Absurdly long indexes still count as joysticks; they just sort last.
    Some( digits.parse().unwrap_or( u32::max_value() ) )
}

/// Finds the joysticks which are currently attached.
pub struct Enumerator {
    registry: Registry,
    directory: PathBuf
}

impl Enumerator {
    pub fn new( registry: &Registry ) -> Self {
        let directory = registry.config().device_dir.clone();
        Enumerator::with_directory( registry, directory )
    }

    pub fn with_directory( registry: &Registry, directory: impl Into< PathBuf > ) -> Self {
        Enumerator {
            registry: registry.clone(),
            directory: directory.into()
        }
    }

    pub fn registry( &self ) -> &Registry {
        &self.registry
    }

    pub fn directory( &self ) -> &Path {
        &self.directory
    }

    /// Returns the paths of all of the joystick device nodes, ordered by their index.
    pub fn scan( &self ) -> Result< Vec< PathBuf >, Error > {
        let to_error = |error| Error::from_io( error, |errno| Error::EnumerationFailure { errno } );
        let mut found = Vec::new();
        for entry in std::fs::read_dir( &self.directory ).map_err( to_error )? {
            let entry = entry.map_err( to_error )?;
            let name = entry.file_name();
            let index = match name.to_str().and_then( joystick_index ) {
                Some( index ) => index,
                None => continue
            };

            found.push( (index, entry.path()) );
        }

        found.sort();
        Ok( found.into_iter().map( |(_, path)| path ).collect() )
    }

    /// Opens every attached joystick through the registry.
    ///
    /// Devices which can't be opened are skipped.
    pub fn open_all( &self ) -> Result< Vec< (DeviceDescriptor, Session) >, Error > {
        let mut devices = Vec::new();
        for path in self.scan()? {
            let path = match path.to_str() {
                Some( path ) => path.to_owned(),
                None => {
                    warn!( "Skipping {:?}: the path is not valid UTF-8", path );
                    continue;
                }
            };

            let session = self.registry.open( &path );
            match session.descriptor() {
                Ok( descriptor ) => devices.push( (descriptor, session) ),
                Err( error ) => {
                    let error = session.open_error().unwrap_or( error );
                    warn!( "Skipping {}: {}", path, error );
                }
            }
        }

        Ok( devices )
    }

    /// Takes a snapshot of every attached joystick.
    ///
    /// An empty list is not an error; see `require_devices`.
    pub fn list( &self ) -> Result< Vec< DeviceDescriptor >, Error > {
        let devices = self.open_all()?;
        Ok( devices.into_iter().map( |(descriptor, session)| {
            self.registry.release( session );
            descriptor
        }).collect() )
    }
}

/// Returns the identity string of the device at `path`, opening it only for
/// as long as it takes to ask.
pub fn describe_unopened( registry: &Registry, path: &str ) -> Result< String, Error > {
    let session = registry.try_open( path )?;
    let name = session.describe();
    registry.release( session );
    name
}

/// Fails with `Error::NoDevicesFound` if the listing is empty.
pub fn require_devices( devices: Vec< DeviceDescriptor > ) -> Result< Vec< DeviceDescriptor >, Error > {
    if devices.is_empty() {
        return Err( Error::NoDevicesFound );
    }

    Ok( devices )
}
