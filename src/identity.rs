//! Instance identity derived from launch arguments.

/// Launch flag carrying the 0-based instance index.
pub const INSTANCE_FLAG: &str = "--instance";

/// Immutable per-process identity. Instance 0 is the canonical main instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceIdentity {
    pub index: u32,
}

impl InstanceIdentity {
    pub fn new(index: u32) -> Self {
        Self { index }
    }

    /// Heuristic leader role used when no lock primitive is available.
    pub fn is_main(&self) -> bool {
        self.index == 0
    }

    /// Identity of the running process, from `std::env::args()`.
    pub fn from_env() -> Self {
        resolve(std::env::args())
    }
}

/// Scan `args` for `--instance N` (or `--instance=N`).
///
/// Absence or an unparsable value yields index 0.
pub fn resolve<I, S>(args: I) -> InstanceIdentity
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        let arg = arg.as_ref();
        let value = if arg == INSTANCE_FLAG {
            match args.next() {
                Some(v) => v.as_ref().trim().to_string(),
                None => break,
            }
        } else if let Some(v) = arg.strip_prefix("--instance=") {
            v.trim().to_string()
        } else {
            continue;
        };

        return match value.parse::<u32>() {
            Ok(index) => InstanceIdentity::new(index),
            Err(_) => {
                log::warn!("Ignoring invalid instance index {:?}, defaulting to 0", value);
                InstanceIdentity::new(0)
            }
        };
    }

    InstanceIdentity::new(0)
}
