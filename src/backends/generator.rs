//! External generator integration
//!
//! Runs the menu-cache-gen executable that composes a menu and writes the
//! cache file. The generator renames its output into place, so a failed run
//! leaves the previous cache file untouched.

use std::fs;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::core::env::XdgEnv;
use crate::core::error::GeneratorError;

/// One generator run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateJob {
    pub menu: String,
    pub lang: String,
    pub output: PathBuf,
    pub env: XdgEnv,
    /// Regenerate even if the output looks up to date
    pub force: bool,
}

/// Something that can (re)produce a cache file
pub trait Generator {
    fn generate(&mut self, job: &GenerateJob) -> Result<(), GeneratorError>;
}

/// Generator backed by an external executable
#[derive(Debug, Clone)]
pub struct ProcessGenerator {
    program: PathBuf,
}

impl ProcessGenerator {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    /// Command line for a job, with the captured XDG environment applied.
    /// Empty values unset the variable.
    pub fn command(&self, job: &GenerateJob) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-i")
            .arg(&job.menu)
            .arg("-o")
            .arg(&job.output)
            .arg("-l")
            .arg(&job.lang);
        if job.force {
            cmd.arg("-f");
        }

        for (name, value) in job.env.vars() {
            if value.is_empty() {
                cmd.env_remove(name);
            } else {
                cmd.env(name, value);
            }
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd
    }
}

impl Generator for ProcessGenerator {
    fn generate(&mut self, job: &GenerateJob) -> Result<(), GeneratorError> {
        if let Some(dir) = job.output.parent() {
            fs::create_dir_all(dir).map_err(|source| GeneratorError::OutputDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        tracing::debug!(
            program = %self.program.display(),
            menu = %job.menu,
            lang = %job.lang,
            output = %job.output.display(),
            force = job.force,
            "running generator"
        );

        let output = self
            .command(job)
            .output()
            .map_err(|source| GeneratorError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(GeneratorError::Failed {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("gen.sh");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn job(output: PathBuf) -> GenerateJob {
        GenerateJob {
            menu: "applications.menu".to_string(),
            lang: "en_US".to_string(),
            output,
            env: XdgEnv {
                data_dirs: "/opt/share".to_string(),
                ..Default::default()
            },
            force: true,
        }
    }

    #[test]
    fn test_arguments_and_environment() {
        let temp = tempfile::tempdir().unwrap();
        let program = script(
            temp.path(),
            "out=\"$4\"\necho \"$@\" > \"$out\"\necho \"data=$XDG_DATA_DIRS menu=${XDG_MENU_PREFIX-unset}\" >> \"$out\"",
        );
        let output = temp.path().join("menus").join("fp");

        let mut gen = ProcessGenerator::new(&program);
        gen.generate(&job(output.clone())).unwrap();

        let written = fs::read_to_string(&output).unwrap();
        let mut lines = written.lines();
        assert_eq!(
            lines.next().unwrap(),
            format!(
                "-i applications.menu -o {} -l en_US -f",
                output.display()
            )
        );
        assert_eq!(lines.next().unwrap(), "data=/opt/share menu=unset");
    }

    #[test]
    fn test_nonzero_exit_is_failure() {
        let temp = tempfile::tempdir().unwrap();
        let program = script(temp.path(), "echo broken menu >&2\nexit 3");

        let mut gen = ProcessGenerator::new(&program);
        match gen.generate(&job(temp.path().join("out"))) {
            Err(GeneratorError::Failed { status, stderr }) => {
                assert_eq!(status.code(), Some(3));
                assert_eq!(stderr, "broken menu");
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_program() {
        let temp = tempfile::tempdir().unwrap();
        let mut gen = ProcessGenerator::new(temp.path().join("no-such-gen"));
        assert!(matches!(
            gen.generate(&job(temp.path().join("out"))),
            Err(GeneratorError::Spawn { .. })
        ));
    }
}
