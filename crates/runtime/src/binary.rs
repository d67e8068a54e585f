//! Engine binary resolution
//!
//! Locates the platform-specific engine executable.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Runtime override pointing directly at an engine executable.
pub const ENGINE_PATH_ENV: &str = "SIDECAR_ENGINE_PATH";

/// Runtime override pointing at a directory of per-platform engine builds.
pub const ENGINE_DIR_ENV: &str = "SIDECAR_ENGINE_DIR";

/// Argument telling the engine to read its configuration from stdin.
pub const CONFIG_STDIN_ARG: &str = "--config-stdin";

const ENGINE_NAME: &str = "engine";

/// Maps an `(os, arch)` pair (as in [`std::env::consts`]) to the directory
/// name engine builds are published under.
pub fn platform_dir(os: &str, arch: &str) -> Option<&'static str> {
	match (os, arch) {
		("linux", "x86_64") => Some("linux-x64"),
		("linux", "aarch64") => Some("linux-arm64"),
		("macos", "x86_64") => Some("darwin-x64"),
		("macos", "aarch64") => Some("darwin-arm64"),
		("windows", "x86_64") => Some("win32-x64"),
		_ => None,
	}
}

fn engine_file_name(os: &str) -> String {
	if os == "windows" {
		format!("{ENGINE_NAME}.exe")
	} else {
		ENGINE_NAME.to_string()
	}
}

/// Get the path to the engine executable
///
/// This function attempts to locate the engine in the following order:
/// 1. `explicit`, when given (no fallback if it does not exist)
/// 2. SIDECAR_ENGINE_PATH environment variable (runtime override)
/// 3. SIDECAR_ENGINE_DIR/<platform>/engine (per-platform install tree)
/// 4. `engine` on PATH
///
/// Steps 3 and 4 only run on platforms with a published build.
///
/// # Errors
///
/// Returns `Error::UnsupportedPlatform` if nothing overrides the lookup and the
/// platform has no build, and `Error::BinaryNotFound` if every candidate is missing.
pub fn resolve_engine_binary(explicit: Option<&Path>) -> Result<PathBuf> {
	let lookup = Lookup {
		explicit: explicit.map(Path::to_path_buf),
		env_path: std::env::var_os(ENGINE_PATH_ENV).map(PathBuf::from),
		env_dir: std::env::var_os(ENGINE_DIR_ENV).map(PathBuf::from),
		os: std::env::consts::OS,
		arch: std::env::consts::ARCH,
	};
	lookup.resolve(|name| which::which(name).ok())
}

struct Lookup {
	explicit: Option<PathBuf>,
	env_path: Option<PathBuf>,
	env_dir: Option<PathBuf>,
	os: &'static str,
	arch: &'static str,
}

impl Lookup {
	fn resolve<F>(self, find_on_path: F) -> Result<PathBuf>
	where
		F: Fn(&str) -> Option<PathBuf>,
	{
		if let Some(explicit) = self.explicit {
			if is_executable_file(&explicit) {
				return Ok(explicit);
			}
			return Err(Error::BinaryNotFound {
				searched: vec![explicit],
			});
		}

		let mut searched = Vec::new();

		if let Some(env_path) = self.env_path {
			if is_executable_file(&env_path) {
				debug!(target: "sidecar.binary", path = %env_path.display(), "using {ENGINE_PATH_ENV}");
				return Ok(env_path);
			}
			warn!(
				target: "sidecar.binary",
				path = %env_path.display(),
				"{ENGINE_PATH_ENV} is set but not an executable file; falling back"
			);
			searched.push(env_path);
		}

		let Some(platform) = platform_dir(self.os, self.arch) else {
			return Err(Error::UnsupportedPlatform {
				os: self.os.to_string(),
				arch: self.arch.to_string(),
			});
		};
		let file_name = engine_file_name(self.os);

		if let Some(dir) = self.env_dir {
			let candidate = dir.join(platform).join(&file_name);
			if is_executable_file(&candidate) {
				return Ok(candidate);
			}
			searched.push(candidate);
		}

		if let Some(found) = find_on_path(&file_name) {
			return Ok(found);
		}
		searched.push(PathBuf::from(format!("$PATH/{file_name}")));

		Err(Error::BinaryNotFound { searched })
	}
}

#[cfg(unix)]
fn is_executable_file(path: &Path) -> bool {
	use std::os::unix::fs::PermissionsExt;

	path.metadata()
		.map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
		.unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable_file(path: &Path) -> bool {
	path.is_file()
}

#[cfg(test)]
mod tests {
	use std::fs;
	#[cfg(unix)]
	use std::os::unix::fs::PermissionsExt;

	use tempfile::TempDir;

	use super::*;

	fn write_mock_engine(path: &Path) {
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent).unwrap();
		}
		fs::write(path, "#!/bin/sh\nexit 0\n").unwrap();
		#[cfg(unix)]
		{
			let mut perms = fs::metadata(path).unwrap().permissions();
			perms.set_mode(0o755);
			fs::set_permissions(path, perms).unwrap();
		}
	}

	fn lookup() -> Lookup {
		Lookup {
			explicit: None,
			env_path: None,
			env_dir: None,
			os: "linux",
			arch: "x86_64",
		}
	}

	#[test]
	fn test_platform_table() {
		assert_eq!(platform_dir("linux", "x86_64"), Some("linux-x64"));
		assert_eq!(platform_dir("macos", "aarch64"), Some("darwin-arm64"));
		assert_eq!(platform_dir("freebsd", "x86_64"), None);
		assert_eq!(platform_dir("linux", "riscv64"), None);
	}

	#[test]
	fn test_explicit_path_wins() {
		let temp = TempDir::new().unwrap();
		let engine = temp.path().join("my-engine");
		write_mock_engine(&engine);

		let resolved = Lookup {
			explicit: Some(engine.clone()),
			..lookup()
		}
		.resolve(|_| panic!("PATH should not be consulted"))
		.unwrap();
		assert_eq!(resolved, engine);
	}

	#[test]
	fn test_missing_explicit_path_is_not_found() {
		let temp = TempDir::new().unwrap();
		let err = Lookup {
			explicit: Some(temp.path().join("nope")),
			..lookup()
		}
		.resolve(|_| None)
		.unwrap_err();
		assert!(matches!(err, Error::BinaryNotFound { .. }));
	}

	#[test]
	fn test_env_dir_uses_platform_subdirectory() {
		let temp = TempDir::new().unwrap();
		let engine = temp.path().join("linux-x64").join("engine");
		write_mock_engine(&engine);

		let resolved = Lookup {
			env_dir: Some(temp.path().to_path_buf()),
			..lookup()
		}
		.resolve(|_| None)
		.unwrap();
		assert_eq!(resolved, engine);
	}

	#[test]
	fn test_broken_env_path_falls_back_to_path_lookup() {
		let temp = TempDir::new().unwrap();
		let on_path = temp.path().join("bin").join("engine");

		let resolved = Lookup {
			env_path: Some(temp.path().join("missing")),
			..lookup()
		}
		.resolve(|name| {
			assert_eq!(name, "engine");
			Some(on_path.clone())
		})
		.unwrap();
		assert_eq!(resolved, on_path);
	}

	#[test]
	fn test_unsupported_platform() {
		let err = Lookup {
			os: "freebsd",
			arch: "x86_64",
			..lookup()
		}
		.resolve(|_| None)
		.unwrap_err();
		match err {
			Error::UnsupportedPlatform { os, arch } => {
				assert_eq!(os, "freebsd");
				assert_eq!(arch, "x86_64");
			}
			other => panic!("Unexpected error: {:?}", other),
		}
	}

	#[test]
	fn test_nothing_found_lists_candidates() {
		let temp = TempDir::new().unwrap();
		let err = Lookup {
			env_dir: Some(temp.path().to_path_buf()),
			..lookup()
		}
		.resolve(|_| None)
		.unwrap_err();
		match err {
			Error::BinaryNotFound { searched } => assert_eq!(searched.len(), 2),
			other => panic!("Unexpected error: {:?}", other),
		}
	}
}
