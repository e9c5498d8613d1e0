use std::env;
use std::fs;
use std::io;
use std::path::PathBuf;

/// Environment variable overriding the base directory for all job state.
pub const ROOT_ENV: &str = "JOBKIT_ROOT";

/// Directory layout under the base dir. All subdirectories are created
/// eagerly so later file operations only ever race on their own files.
#[derive(Clone, Debug)]
pub struct Paths {
    pub base: PathBuf,
    pub outputs: PathBuf,
    pub scripts: PathBuf,
    pub workflows: PathBuf,
}

impl Paths {
    /// Resolve from `JOBKIT_ROOT`, falling back to the current directory.
    pub fn from_env() -> io::Result<Self> {
        let base = match env::var_os(ROOT_ENV) {
            Some(root) => PathBuf::from(root),
            None => env::current_dir()?,
        };
        Self::at(base)
    }

    pub fn at(base: PathBuf) -> io::Result<Self> {
        let paths = Self {
            outputs: base.join("outputs"),
            scripts: base.join("scripts"),
            workflows: base.join("workflows"),
            base,
        };
        fs::create_dir_all(&paths.base)?;
        fs::create_dir_all(&paths.outputs)?;
        fs::create_dir_all(&paths.scripts)?;
        fs::create_dir_all(&paths.workflows)?;
        Ok(paths)
    }
}
