//! Leader election through an OS advisory lock.
//!
//! Only the process holding the lock may write the bus. The OS drops the lock
//! when the holder dies, so a crashed leader is replaceable by the next
//! instance that tries.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::bus::atomic;
use crate::error::{Result, SyncError};
use crate::identity::InstanceIdentity;

#[cfg(unix)]
mod os {
    use std::fs::File;
    use std::io::{self, Seek, SeekFrom, Write};

    use nix::errno::Errno;
    use nix::fcntl::{Flock, FlockArg};

    pub struct Held(#[allow(dead_code)] Flock<File>);

    fn attempt(file: File, arg: FlockArg) -> io::Result<Option<Flock<File>>> {
        match Flock::lock(file, arg) {
            Ok(lock) => Ok(Some(lock)),
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => Ok(None),
            Err((_, errno)) => Err(io::Error::from(errno)),
        }
    }

    /// Non-blocking exclusive lock. `Ok(None)` means someone else holds it.
    pub fn try_exclusive(file: File) -> io::Result<Option<Held>> {
        let Some(mut lock) = attempt(file, FlockArg::LockExclusiveNonblock)? else {
            return Ok(None);
        };
        // Diagnostic only: who holds the lock.
        lock.set_len(0)?;
        lock.seek(SeekFrom::Start(0))?;
        write!(lock, "{}", std::process::id())?;
        Ok(Some(Held(lock)))
    }

    /// Whether anyone holds an exclusive lock on `file`.
    pub fn is_held_exclusively(file: File) -> io::Result<bool> {
        Ok(attempt(file, FlockArg::LockSharedNonblock)?.is_none())
    }
}

#[cfg(not(unix))]
mod os {
    use std::fs::File;
    use std::io;

    pub struct Held;

    pub fn try_exclusive(_file: File) -> io::Result<Option<Held>> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "advisory locks unavailable"))
    }

    pub fn is_held_exclusively(_file: File) -> io::Result<bool> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "advisory locks unavailable"))
    }
}

fn open_lock_file(path: &Path) -> io::Result<File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
}

enum Backend {
    /// Advisory lock on a file named after the application identity.
    File { path: PathBuf, held: Option<os::Held> },
    /// Role fixed at construction; used by tests and single-instance hosts.
    Fixed(bool),
}

/// Decides whether this process may broadcast.
pub struct LeaderElection {
    identity: InstanceIdentity,
    backend: Backend,
    /// Set once the lock primitive proved unusable on this platform.
    heuristic: bool,
}

impl LeaderElection {
    /// Election over `<lock_dir>/<app_id>.lock`.
    pub fn new(lock_dir: &Path, app_id: &str, identity: InstanceIdentity) -> Self {
        Self {
            identity,
            backend: Backend::File {
                path: lock_dir.join(format!("{}.lock", app_id)),
                held: None,
            },
            heuristic: false,
        }
    }

    pub fn fixed(identity: InstanceIdentity, leader: bool) -> Self {
        Self {
            identity,
            backend: Backend::Fixed(leader),
            heuristic: false,
        }
    }

    pub fn identity(&self) -> InstanceIdentity {
        self.identity
    }

    /// Non-blocking attempt to become the leader. Returns the resulting role.
    pub fn try_acquire(&mut self) -> bool {
        if self.heuristic {
            return self.identity.is_main();
        }

        let (path, held) = match &mut self.backend {
            Backend::Fixed(leader) => return *leader,
            Backend::File { path, held } => (path, held),
        };
        if held.is_some() {
            return true;
        }

        let result = open_lock_file(path).and_then(os::try_exclusive);
        match result {
            Ok(Some(lock)) => {
                log::info!("Acquired leader lock {:?}", path);
                *held = Some(lock);
                true
            }
            Ok(None) => {
                log::debug!("Leader lock {:?} is held by another instance", path);
                false
            }
            Err(e) if e.kind() == io::ErrorKind::Unsupported => {
                log::warn!(
                    "Leader lock unavailable ({}), falling back to instance index {}",
                    e,
                    self.identity.index
                );
                self.heuristic = true;
                self.identity.is_main()
            }
            Err(e) => {
                let err = SyncError::Lock {
                    path: path.clone(),
                    source: e,
                };
                log::warn!("Leader election failed, staying follower: {}", err);
                false
            }
        }
    }

    pub fn is_leader(&self) -> bool {
        if self.heuristic {
            return self.identity.is_main();
        }
        match &self.backend {
            Backend::Fixed(leader) => *leader,
            Backend::File { held, .. } => held.is_some(),
        }
    }

    /// Give up leadership. Dropping the election does the same.
    pub fn release(&mut self) {
        match &mut self.backend {
            Backend::File { path, held } => {
                if held.take().is_some() {
                    log::info!("Released leader lock {:?}", path);
                }
            }
            Backend::Fixed(leader) => *leader = false,
        }
    }
}

/// Manual broadcast switch shared by every instance through `<bus>.gate`.
///
/// While disabled, this process holds the gate exclusively and no instance
/// broadcasts; enabling releases it.
pub struct BroadcastGate {
    path: PathBuf,
    enabled: bool,
    held: Option<os::Held>,
}

impl BroadcastGate {
    pub fn for_bus(bus_path: &Path) -> Self {
        Self {
            path: atomic::sibling(bus_path, "gate"),
            enabled: true,
            held: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) -> Result<()> {
        self.enabled = enabled;
        if enabled {
            if self.held.take().is_some() {
                log::info!("Broadcast enabled, released gate {:?}", self.path);
            }
            return Ok(());
        }

        if self.held.is_some() {
            return Ok(());
        }
        let result = open_lock_file(&self.path).and_then(os::try_exclusive);
        match result {
            Ok(Some(lock)) => {
                log::info!("Broadcast disabled, holding gate {:?}", self.path);
                self.held = Some(lock);
                Ok(())
            }
            Ok(None) => {
                log::info!("Broadcast disabled; gate already held by another instance");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::Unsupported => Ok(()),
            Err(source) => Err(SyncError::Lock {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Local switch on and no other instance holding the gate.
    pub fn allows_broadcast(&self) -> bool {
        if !self.enabled {
            return false;
        }
        if !self.path.exists() {
            return true;
        }
        match File::open(&self.path).and_then(os::is_held_exclusively) {
            Ok(held) => !held,
            Err(e) => {
                log::debug!("Gate probe failed ({}), assuming open", e);
                true
            }
        }
    }
}
