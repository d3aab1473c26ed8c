//! Three representative wrapped file-system operations — `read`, `write`,
//! `stat` — each the three-piece sync-adapter pattern applied to a blocking
//! `std::fs` call run on [`IoDriver`]'s background threads.
//!
//! Contract (§4.7), identical for all three:
//!
//! * Pre: the caller must be executing inside a fiber.
//! * Post: returns the underlying operation's result; on failure, the
//!   error carries the errno-style code the completion callback observed.
use std::fs;
use std::io;
use std::path::PathBuf;

use crate::adapter::SyncArgs;
use crate::error::{Error, Result};
use crate::io_driver::IoDriver;

fn to_op_error(source: io::Error) -> Error {
    let errno = source.raw_os_error().unwrap_or(libc::EIO);
    Error::Op { errno, source }
}

/// Reads an entire file's contents. Mirrors the argument-block/completion/
/// dispatch triplet every `syncop_*` wrapper in the original follows, with
/// `fs::read` standing in for the wrapped async call.
pub fn read(driver: &IoDriver, path: impl Into<PathBuf>) -> Result<Vec<u8>> {
    let path = path.into();
    let args = SyncArgs::new();
    let cbk_args = args.clone();
    driver.submit(move || {
        let result = fs::read(&path).map_err(to_op_error);
        cbk_args.complete(result);
    });
    args.dispatch()
}

/// Writes `data` to `path`, creating or truncating it.
pub fn write(driver: &IoDriver, path: impl Into<PathBuf>, data: Vec<u8>) -> Result<()> {
    let path = path.into();
    let args = SyncArgs::new();
    let cbk_args = args.clone();
    driver.submit(move || {
        let result = fs::write(&path, &data).map_err(to_op_error);
        cbk_args.complete(result);
    });
    args.dispatch()
}

/// A deliberately small subset of `std::fs::Metadata`, enough to exercise
/// the adapter without committing to platform-specific metadata fields.
#[derive(Debug, Clone, Copy)]
pub struct FileStat {
    pub len: u64,
    pub is_dir: bool,
    pub readonly: bool,
}

/// Stats a path.
pub fn stat(driver: &IoDriver, path: impl Into<PathBuf>) -> Result<FileStat> {
    let path = path.into();
    let args = SyncArgs::new();
    let cbk_args = args.clone();
    driver.submit(move || {
        let result = fs::metadata(&path).map(|m| FileStat {
            len: m.len(),
            is_dir: m.is_dir(),
            readonly: m.permissions().readonly(),
        }).map_err(to_op_error);
        cbk_args.complete(result);
    });
    args.dispatch()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{EnvConfig, Environment};
    use std::time::Duration;

    fn env() -> std::sync::Arc<Environment> {
        Environment::new(EnvConfig {
            proc_min: 1,
            proc_max: 2,
            idle_timeout: Duration::from_millis(50),
            ..EnvConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn write_then_read_round_trips_through_the_adapter() {
        let env = env();
        let driver = IoDriver::new(2).unwrap();
        let dir = std::env::temp_dir().join(format!("synctask-ops-fs-{:?}", std::thread::current().id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("roundtrip.txt");

        let ret = env
            .spawn_sync(None, {
                let path = path.clone();
                move || {
                    write(&driver, path.clone(), b"hello fiber".to_vec()).unwrap();
                    let contents = read(&driver, path.clone()).unwrap();
                    let stat = stat(&driver, path).unwrap();
                    assert_eq!(contents, b"hello fiber");
                    assert!(!stat.is_dir);
                    driver.shutdown();
                    stat.len as i32
                }
            })
            .unwrap();

        assert_eq!(ret, "hello fiber".len() as i32);
        let _ = std::fs::remove_dir_all(&dir);
        env.shutdown();
    }

    #[test]
    fn read_of_missing_file_surfaces_as_op_error() {
        let env = env();
        let driver = IoDriver::new(1).unwrap();
        let missing = std::env::temp_dir().join("synctask-ops-fs-definitely-missing-12345");

        let ret = env
            .spawn_sync(None, move || match read(&driver, missing) {
                Err(Error::Op { .. }) => 1,
                _ => 0,
            })
            .unwrap();

        assert_eq!(ret, 1);
        env.shutdown();
    }
}
