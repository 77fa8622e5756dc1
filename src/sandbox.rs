// ABOUTME: Capability-based I/O mediator: path canonicalisation, policy checks, command execution

use crate::env::{Environment, SecurityPolicy};
use crate::error::EvalError;
use crate::value::{Dictionary, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
    Execute,
}

/// Resolves a path/file/dir typed dictionary to the absolute path it names,
/// joining against the environment's root path when the stored path is
/// relative.
pub fn dict_to_abs_path(dict: &Dictionary) -> Result<PathBuf, EvalError> {
    let raw = crate::typed_dict::try_to_string(dict)
        .ok_or_else(|| EvalError::validation_error("expected a path, file, or dir dictionary"))?;
    let candidate = PathBuf::from(&raw);
    if candidate.is_absolute() {
        return Ok(candidate);
    }
    let root = dict.env.context.borrow().root_path.clone();
    match root {
        Some(r) => Ok(PathBuf::from(r.as_ref()).join(candidate)),
        None => std::env::current_dir()
            .map(|cwd| cwd.join(candidate))
            .map_err(|_| EvalError::io_path_resolution_failed(&raw)),
    }
}

/// Resolves `.`/`..` and symlinks before any policy decision. If the leaf
/// does not exist yet (legal for writes), canonicalises the deepest existing
/// ancestor and reattaches the remaining components literally.
fn canonicalise(path: &Path) -> Result<PathBuf, EvalError> {
    if let Ok(real) = path.canonicalize() {
        return Ok(real);
    }
    let mut existing = path.to_path_buf();
    let mut remainder: Vec<std::ffi::OsString> = Vec::new();
    loop {
        if existing.as_os_str().is_empty() {
            return Err(EvalError::io_path_resolution_failed(&path.display().to_string()));
        }
        match existing.canonicalize() {
            Ok(real) => {
                let mut out = real;
                for part in remainder.into_iter().rev() {
                    out.push(part);
                }
                return Ok(out);
            }
            Err(_) => {
                let Some(name) = existing.file_name() else {
                    return Err(EvalError::io_path_resolution_failed(&path.display().to_string()));
                };
                remainder.push(name.to_os_string());
                existing = match existing.parent() {
                    Some(p) => p.to_path_buf(),
                    None => return Err(EvalError::io_path_resolution_failed(&path.display().to_string())),
                };
            }
        }
    }
}

fn within_any(path: &Path, dirs: &[String]) -> bool {
    dirs.iter().any(|d| path.starts_with(Path::new(d)))
}

/// Runs `checkPathAccess` against the environment's active security policy
/// and returns the canonicalised path on success.
pub fn check_path_access(env: &Rc<Environment>, path: &Path, op: Operation) -> Result<PathBuf, EvalError> {
    let canonical = canonicalise(path)?;
    let policy = env.context.borrow().security_policy.clone();
    let Some(policy) = policy else {
        return Ok(canonical);
    };
    match op {
        Operation::Read => {
            if policy.no_read {
                log::warn!("policy denied read (no_read): {}", canonical.display());
                return Err(EvalError::security_read_denied(&canonical.display().to_string()));
            }
            if within_any(&canonical, &policy.restrict_read) {
                log::warn!("policy denied read (restricted): {}", canonical.display());
                return Err(EvalError::security_read_denied(&canonical.display().to_string()));
            }
        }
        Operation::Write => {
            if policy.no_write {
                log::warn!("policy denied write (no_write): {}", canonical.display());
                return Err(EvalError::security_write_denied(&canonical.display().to_string()));
            }
            if within_any(&canonical, &policy.restrict_write) {
                log::warn!("policy denied write (restricted): {}", canonical.display());
                return Err(EvalError::security_write_denied(&canonical.display().to_string()));
            }
            if policy.allow_write_all && !within_any(&canonical, &policy.allow_write) {
                log::warn!("policy denied write (outside allowlist): {}", canonical.display());
                return Err(EvalError::security_write_denied(&canonical.display().to_string()));
            }
        }
        Operation::Execute => {
            if !policy.allow_execute_all && !within_any(&canonical, &policy.allow_execute) {
                log::warn!("policy denied execute (outside allowlist): {}", canonical.display());
                return Err(EvalError::security_execute_denied(&canonical.display().to_string()));
            }
        }
    }
    Ok(canonical)
}

/// Command execution options: `cwd`, `env`, and `stdin`, pulled from a
/// caller-supplied options dictionary.
pub struct ExecOptions {
    pub cwd: Option<PathBuf>,
    pub env_vars: HashMap<String, String>,
    pub stdin: Option<Vec<u8>>,
}

impl ExecOptions {
    pub fn from_dict(dict: Option<&Dictionary>) -> Result<Self, EvalError> {
        let mut opts = ExecOptions { cwd: None, env_vars: HashMap::new(), stdin: None };
        let Some(dict) = dict else { return Ok(opts) };
        if let Ok(Value::Dictionary(cwd_dict)) = dict.get("dir") {
            opts.cwd = Some(dict_to_abs_path(&cwd_dict)?);
        }
        if let Ok(Value::Dictionary(env_dict)) = dict.get("env") {
            for key in env_dict.keys() {
                if let Ok(Value::String(v)) = env_dict.get(&key) {
                    opts.env_vars.insert(key, v.to_string());
                }
            }
        }
        if let Ok(Value::String(s)) = dict.get("stdin") {
            opts.stdin = Some(s.as_bytes().to_vec());
        }
        Ok(opts)
    }
}

/// Spawns `argv[0]` with the remaining elements as literal arguments — never
/// through a shell — and always produces a `{stdout, stderr, exitCode}`
/// dictionary, even on spawn failure.
pub fn run_command(
    argv: &[String],
    options: &ExecOptions,
    env: &Rc<Environment>,
) -> Result<Dictionary, EvalError> {
    let Some(program) = argv.first() else {
        return Err(EvalError::validation_error("exec: empty argv"));
    };
    let program_path = PathBuf::from(program);
    if program_path.is_absolute() {
        check_path_access(env, &program_path, Operation::Execute)?;
    }
    let mut cmd = Command::new(program);
    cmd.args(&argv[1..]);
    if let Some(cwd) = &options.cwd {
        let checked = check_path_access(env, cwd, Operation::Execute)?;
        cmd.current_dir(checked);
    }
    for (k, v) in &options.env_vars {
        cmd.env(k, v);
    }
    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());

    let result = (|| -> std::io::Result<(String, String, i32)> {
        let mut child = cmd.spawn()?;
        if let Some(input) = &options.stdin {
            use std::io::Write;
            child.stdin.take().unwrap().write_all(input)?;
        } else {
            drop(child.stdin.take());
        }
        let output = child.wait_with_output()?;
        Ok((
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
            output.status.code().unwrap_or(-1),
        ))
    })();

    let (stdout, stderr, exit_code) = match result {
        Ok(r) => r,
        Err(e) => (String::new(), e.to_string(), -1),
    };

    Ok(Dictionary::from_values(
        vec![
            ("stdout".to_string(), Value::str(stdout)),
            ("stderr".to_string(), Value::str(stderr)),
            ("exitCode".to_string(), Value::Integer(exit_code as i64)),
        ],
        env.clone(),
    ))
}

/// Open/verify a path/file/dir's backing security policy is unrestricted
/// before any ambient filesystem metadata read (e.g. `.exists`), reusing the
/// read-policy branch of `checkPathAccess`.
pub fn ensure_readable(env: &Rc<Environment>, path: &Path) -> Result<PathBuf, EvalError> {
    check_path_access(env, path, Operation::Read)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    fn policy_env(policy: SecurityPolicy) -> Rc<Environment> {
        let env = Environment::new();
        env.context.borrow_mut().security_policy = Some(Rc::new(policy));
        env
    }

    #[test]
    #[serial]
    fn allows_read_with_no_policy() {
        let env = Environment::new();
        let dir = std::env::temp_dir().join("basil_sandbox_test_noread");
        fs::create_dir_all(&dir).unwrap();
        let file = dir.join("a.txt");
        fs::write(&file, "hi").unwrap();
        assert!(check_path_access(&env, &file, Operation::Read).is_ok());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    #[serial]
    fn denies_read_inside_restricted_directory() {
        let dir = std::env::temp_dir().join("basil_sandbox_test_restricted");
        fs::create_dir_all(&dir).unwrap();
        let file = dir.join("secret.txt");
        fs::write(&file, "secret").unwrap();
        let canonical_dir = dir.canonicalize().unwrap();
        let env = policy_env(SecurityPolicy {
            restrict_read: vec![canonical_dir.display().to_string()],
            ..Default::default()
        });
        let err = check_path_access(&env, &file, Operation::Read).unwrap_err();
        assert_eq!(err.code(), "SEC-0002");
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    #[serial]
    fn whitelist_write_mode_denies_outside_allowed_dirs() {
        let dir = std::env::temp_dir().join("basil_sandbox_test_writeall");
        fs::create_dir_all(&dir).unwrap();
        let file = dir.join("out.txt");
        let env = policy_env(SecurityPolicy { allow_write_all: true, allow_write: vec![], ..Default::default() });
        let err = check_path_access(&env, &file, Operation::Write).unwrap_err();
        assert_eq!(err.code(), "SEC-0003");
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    #[serial]
    fn execute_denied_without_allowlist() {
        let env = Environment::new();
        let path = std::env::temp_dir().join("basil_sandbox_test_exec_denied");
        fs::write(&path, b"").unwrap();
        let err = check_path_access(&env, &path, Operation::Execute).unwrap_err();
        assert_eq!(err.code(), "SEC-0004");
        fs::remove_file(&path).ok();
    }

    #[test]
    #[serial]
    fn command_argv_is_never_shell_interpreted() {
        let env = Environment::new();
        let opts = ExecOptions { cwd: None, env_vars: HashMap::new(), stdin: None };
        let result = run_command(&["echo".to_string(), "-n".to_string(), "hi; rm -rf /".to_string()], &opts, &env).unwrap();
        assert_eq!(result.get("exitCode").unwrap().to_string(), "0");
        assert_eq!(result.get("stdout").unwrap().to_string(), "hi; rm -rf /");
    }

    #[test]
    #[serial]
    fn command_spawn_failure_still_produces_result_dict() {
        let env = Environment::new();
        let opts = ExecOptions { cwd: None, env_vars: HashMap::new(), stdin: None };
        let result = run_command(&["basil-definitely-not-a-real-binary".to_string()], &opts, &env).unwrap();
        assert_ne!(result.get("exitCode").unwrap().to_string(), "0");
    }
}
