//! Free-space pre-flight checks.

use std::env;
use std::path::{Path, PathBuf};

use sysinfo::Disks;
use tracing::debug;

use crate::error::{DownloadError, DownloadResult};

/// Mount point and available bytes for the disk holding `path`, by longest
/// mount-point prefix. `None` when no mounted disk covers the path (some
/// containerised filesystems), in which case the caller skips the check.
pub(crate) fn mount_and_space(path: &Path) -> Option<(PathBuf, u64)> {
    let probe = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().ok()?.join(path)
    };

    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| probe.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| (disk.mount_point().to_path_buf(), disk.available_space()))
}

/// Fail when the involved drives cannot hold the payload.
///
/// The destination drive needs `required` bytes. With the on-disk backend
/// the temp drive needs the same again; when temp and destination share a
/// mount, that mount must fit both at once.
pub(crate) fn ensure_capacity(
    destination: &Path,
    temp_dir: Option<&Path>,
    required: u64,
) -> DownloadResult<()> {
    let dest_dir = destination.parent().unwrap_or(Path::new("."));

    let mut demands: Vec<(PathBuf, u64, u64)> = Vec::new();
    for dir in std::iter::once(dest_dir).chain(temp_dir) {
        match mount_and_space(dir) {
            Some((mount, available)) => {
                if let Some(entry) = demands.iter_mut().find(|(m, ..)| *m == mount) {
                    entry.2 += required;
                } else {
                    demands.push((mount, available, required));
                }
            }
            None => {
                debug!(path = %dir.display(), "no mounted disk found for path, skipping space check");
            }
        }
    }

    for (mount, available, need) in demands {
        if available < need {
            return Err(DownloadError::InsufficientDiskSpace {
                mount: mount.display().to_string(),
                required: need,
                available,
            });
        }
    }
    Ok(())
}
