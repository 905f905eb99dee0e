//! Command resolution for upstream runtimes.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use super::PtyError;

/// Resolve the argv used to launch a runtime.
///
/// The override variable wins when it is set to a non-blank value; the value
/// is split with POSIX shell quoting rules. Otherwise the first candidate
/// found executable on `PATH` is used.
///
/// # Errors
///
/// Returns `PtyError::InvalidOverride` if the override cannot be tokenized and
/// `PtyError::Unresolvable` if nothing resolves.
pub fn resolve_command(
    override_env: Option<&str>,
    candidates: &[String],
) -> Result<Vec<String>, PtyError> {
    let override_value = override_env.and_then(|var| std::env::var(var).ok());
    let path = std::env::var_os("PATH").unwrap_or_default();
    resolve_command_from(override_env, override_value, candidates, &path)
}

/// Resolve a command from an explicit override value and search path.
///
/// This is the environment-free core of [`resolve_command`].
///
/// # Errors
///
/// Same as [`resolve_command`].
pub fn resolve_command_from(
    override_env: Option<&str>,
    override_value: Option<String>,
    candidates: &[String],
    path: &OsStr,
) -> Result<Vec<String>, PtyError> {
    if let Some(value) = override_value.filter(|v| !v.trim().is_empty()) {
        let var = override_env.unwrap_or_default();
        return match shlex::split(&value) {
            Some(argv) if !argv.is_empty() => {
                tracing::debug!(var, argv = ?argv, "Resolved command from override");
                Ok(argv)
            }
            _ => Err(PtyError::InvalidOverride {
                var: var.to_string(),
                value,
            }),
        };
    }

    for candidate in candidates {
        if let Some(found) = find_executable(candidate, path) {
            tracing::debug!(candidate = %candidate, path = %found.display(), "Resolved command from PATH");
            return Ok(vec![found.to_string_lossy().into_owned()]);
        }
    }

    Err(PtyError::Unresolvable {
        override_env: override_env.unwrap_or("<unset>").to_string(),
        candidates: candidates.join(", "),
    })
}

/// Render an argv for logs, quoting each word as a shell would.
#[must_use]
pub fn display_command(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| shell_escape::escape(arg.as_str().into()).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Locate `name` in the directories of `path`.
///
/// Names containing a path separator are checked directly.
fn find_executable(name: &str, path: &OsStr) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }
    let direct = Path::new(name);
    if direct.components().count() > 1 {
        return is_executable(direct).then(|| direct.to_path_buf());
    }

    std::env::split_paths(path)
        .filter(|dir| !dir.as_os_str().is_empty())
        .flat_map(|dir| executable_names(name).map(move |file| dir.join(file)))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn executable_names(name: &str) -> impl Iterator<Item = OsString> {
    std::iter::once(OsString::from(name))
}

#[cfg(not(unix))]
fn executable_names(name: &str) -> impl Iterator<Item = OsString> {
    [OsString::from(name), OsString::from(format!("{name}.exe"))].into_iter()
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
