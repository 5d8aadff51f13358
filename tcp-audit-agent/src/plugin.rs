//! Plugin-handle contract and the built-in plugin registry.
//!
//! A plugin handle produces an untyped constructor symbol; the
//! specialised eventer and sinker loaders check its signature and invoke
//! it. Keeping this indirection is what lets the pipeline be assembled
//! from in-process fakes under test. The shipped handle resolves plugins
//! compiled into the agent, keyed on the plugin path's file stem.

use std::any::Any;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::sink::SinkerConstructor;
use crate::source::EventerConstructor;

/// An untyped constructor symbol produced by a plugin handle.
pub type PluginSymbol = Box<dyn Any + Send>;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("no plugin named {0:?} is built in")]
    UnknownPlugin(String),
    #[error("plugin path {0:?} has no file name")]
    BadPath(PathBuf),
}

/// Produces one constructor symbol.
pub trait PluginHandle {
    fn load(&self) -> Result<PluginSymbol, PluginError>;
}

/// Resolves the plugins compiled into the agent: the `ftrace` eventer and
/// the `stdout` sinker. Any path extension is ignored, so both
/// `--event ftrace` and `--event /opt/plugins/ftrace.so` resolve.
pub struct BuiltinPluginHandle {
    path: PathBuf,
}

impl BuiltinPluginHandle {
    pub fn new(path: &Path) -> BuiltinPluginHandle {
        BuiltinPluginHandle {
            path: path.to_path_buf(),
        }
    }
}

impl PluginHandle for BuiltinPluginHandle {
    fn load(&self) -> Result<PluginSymbol, PluginError> {
        let name = self
            .path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| PluginError::BadPath(self.path.clone()))?;

        match name {
            "ftrace" => Ok(Box::new(crate::ftrace::new_eventer as EventerConstructor)),
            "stdout" => Ok(Box::new(crate::sink::new_stdout_sinker as SinkerConstructor)),
            other => Err(PluginError::UnknownPlugin(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_ftrace_as_eventer_constructor() {
        let symbol = BuiltinPluginHandle::new(Path::new("/opt/plugins/ftrace.so"))
            .load()
            .unwrap();
        assert!(symbol.downcast::<EventerConstructor>().is_ok());
    }

    #[test]
    fn resolves_stdout_as_sinker_constructor() {
        let symbol = BuiltinPluginHandle::new(Path::new("stdout")).load().unwrap();
        assert!(symbol.downcast::<SinkerConstructor>().is_ok());
    }

    #[test]
    fn unknown_plugin_name_fails() {
        let err = BuiltinPluginHandle::new(Path::new("/opt/plugins/pgsql.so"))
            .load()
            .unwrap_err();
        assert!(matches!(err, PluginError::UnknownPlugin(name) if name == "pgsql"));
    }
}
