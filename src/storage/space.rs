use crate::error::StorageError;
use std::path::{Path, PathBuf};

const BYTES_PER_GB: f64 = (1u64 << 30) as f64;

/// Free-space lookup for the filesystem holding a path
pub trait SpaceProbe: Send + Sync {
    fn free_bytes(&self, path: &Path) -> Result<u64, StorageError>;

    fn free_gb(&self, path: &Path) -> Result<f64, StorageError> {
        self.free_bytes(path).map(bytes_to_gb)
    }
}

pub fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GB
}

/// Space available to unprivileged users, from `statvfs(3)`
#[derive(Debug, Clone, Copy, Default)]
pub struct StatvfsProbe;

impl SpaceProbe for StatvfsProbe {
    #[cfg(unix)]
    fn free_bytes(&self, path: &Path) -> Result<u64, StorageError> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let target = existing_ancestor(path);
        let query_error = |details: String| StorageError::SpaceQuery {
            path: target.clone(),
            details,
        };

        let c_path = CString::new(target.as_os_str().as_bytes())
            .map_err(|e| query_error(format!("Invalid path: {}", e)))?;

        // SAFETY: `c_path` is NUL-terminated and `stat` is a plain C struct
        // that statvfs fully initialises on success.
        unsafe {
            let mut stat: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                return Err(query_error(format!(
                    "statvfs failed: {}",
                    std::io::Error::last_os_error()
                )));
            }
            #[allow(clippy::unnecessary_cast)]
            let available = stat.f_bavail as u64 * stat.f_frsize as u64;
            Ok(available)
        }
    }

    #[cfg(not(unix))]
    fn free_bytes(&self, path: &Path) -> Result<u64, StorageError> {
        Err(StorageError::SpaceQuery {
            path: path.to_path_buf(),
            details: "free space queries are only supported on unix".to_string(),
        })
    }
}

/// Nearest existing directory at or above `path`, so a cold storage
/// directory that has not been created yet still reports its mount
fn existing_ancestor(path: &Path) -> PathBuf {
    path.ancestors()
        .find(|candidate| !candidate.as_os_str().is_empty() && candidate.exists())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}
