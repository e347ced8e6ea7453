use std::collections::{BTreeSet, HashMap};
use std::env as stdenv;

/// Variables known to the shell process, scoped to its lifetime.
///
/// The environment contains:
/// - `vars`: shell-local variables set by `NAME=VALUE` lines or `export`.
/// - `exported`: names whose values are passed to every child process.
/// - `exit_code`: set by the `exit` builtin to stop the prompt loop.
///
/// The inherited process environment is never modified; it is consulted
/// through `std::env` when a name is not defined locally.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: HashMap<String, String>,
    exported: BTreeSet<String>,
    /// When set, the interactive loop should exit with this code.
    pub exit_code: Option<i32>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the value of a variable.
    ///
    /// Looks up the key in the shell-local variables first, falling back to
    /// the process environment. This is the reverse of a lookup that prefers
    /// the inherited environment: a local `NAME=VALUE` shadows an inherited
    /// `NAME`, so the value just assigned is always the one `$NAME` yields.
    pub fn get_var(&self, key: &str) -> Option<String> {
        self.vars
            .get(key)
            .cloned()
            .or_else(|| stdenv::var(key).ok())
    }

    /// Get a shell-local variable only.
    pub fn get_local(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Set or override a shell-local variable.
    pub fn set_var(&mut self, key: impl Into<String>, val: impl Into<String>) {
        let key = key.into();
        let val = val.into();
        log::debug!("set {}={}", key, val);
        self.vars.insert(key, val);
    }

    /// Mark `key` as exported to child processes.
    ///
    /// Exporting a name that has no local value copies the current process
    /// value (or the empty string) into the shell-local variables so the
    /// child sees a definite value.
    pub fn export(&mut self, key: &str) {
        if !self.vars.contains_key(key) {
            let inherited = stdenv::var(key).unwrap_or_default();
            self.vars.insert(key.to_owned(), inherited);
        }
        self.exported.insert(key.to_owned());
    }

    pub fn is_exported(&self, key: &str) -> bool {
        self.exported.contains(key)
    }

    /// Exported variables with their values, sorted by name.
    pub fn exported_vars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.exported.iter().filter_map(|k| {
            self.vars
                .get_key_value(k)
                .map(|(k, v)| (k.as_str(), v.as_str()))
        })
    }

    /// Names of all shell-local variables, in no particular order.
    pub fn local_names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }
}

/// Returns true if `name` is usable as a variable name: non-empty and free
/// of `=`.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('=')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_set_and_get_var() {
        let mut env = Environment::new();

        // initially absent
        assert_eq!(env.get_var("SOME_RANDOM_ENV_VAR_12345"), None);

        env.set_var("KEY", "VALUE");

        assert_eq!(env.get_var("KEY"), Some("VALUE".to_string()));
        assert_eq!(env.get_local("KEY"), Some("VALUE"));
    }

    #[test]
    fn test_env_reads_from_process_env() {
        let env = Environment::new();
        assert!(env.get_var("PATH").is_some());
        assert_eq!(env.get_local("PATH"), None);
    }

    #[test]
    fn local_value_shadows_process_value() {
        let mut env = Environment::new();
        env.set_var("PATH", "/nowhere");
        assert_eq!(env.get_var("PATH").as_deref(), Some("/nowhere"));
    }

    #[test]
    fn only_exported_names_are_listed() {
        let mut env = Environment::new();
        env.set_var("A", "1");
        env.set_var("B", "2");
        env.export("B");
        env.export("JOBSH_TEST_UNSET_VAR");

        let exported: Vec<_> = env.exported_vars().collect();
        assert_eq!(exported, vec![("B", "2"), ("JOBSH_TEST_UNSET_VAR", "")]);
        assert!(!env.is_exported("A"));
    }

    #[test]
    fn name_syntax() {
        assert!(is_valid_name("FOO"));
        assert!(is_valid_name("a/b"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("A=B"));
    }
}
