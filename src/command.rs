use std::fmt;
use std::fs;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::config::{EnvironmentConfig, ThresholdRange};
use crate::error::PipelineError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A fully-specified external tool call: program, argument vector and an
/// optional wall-clock budget. Arguments are never passed through a shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invocation {
    pub program: Utf8PathBuf,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub fn new(program: impl Into<Utf8PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path(self, path: &Utf8Path) -> Self {
        self.arg(path.as_str())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Name of the program without its directory, used in messages.
    pub fn program_name(&self) -> &str {
        self.program.file_name().unwrap_or(self.program.as_str())
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " {arg:?}")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

pub trait ToolRunner {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, PipelineError>;
}

impl<T: ToolRunner + ?Sized> ToolRunner for &T {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, PipelineError> {
        (**self).run(invocation)
    }
}

/// Runs invocations as child processes. Output is spooled to temporary files
/// so a chatty child cannot block on a full pipe while we poll its deadline.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl ToolRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, PipelineError> {
        tracing::debug!(command = %invocation, "running external tool");
        let program = invocation.program_name().to_string();
        let failed = |message: String| PipelineError::ToolFailed {
            program: program.clone(),
            message,
        };

        let stdout_file = tempfile::tempfile().map_err(|err| failed(err.to_string()))?;
        let stderr_file = tempfile::tempfile().map_err(|err| failed(err.to_string()))?;
        let mut stdout_reader = stdout_file.try_clone().map_err(|err| failed(err.to_string()))?;
        let mut stderr_reader = stderr_file.try_clone().map_err(|err| failed(err.to_string()))?;

        let mut child = Command::new(invocation.program.as_std_path())
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_file))
            .stderr(Stdio::from(stderr_file))
            .spawn()
            .map_err(|err| failed(format!("spawn: {err}")))?;

        let started = Instant::now();
        let status = loop {
            match child.try_wait().map_err(|err| failed(err.to_string()))? {
                Some(status) => break status,
                None => {
                    if let Some(limit) = invocation.timeout {
                        if started.elapsed() >= limit {
                            let _ = child.kill();
                            let _ = child.wait();
                            return Err(PipelineError::EngineTimeout {
                                program,
                                seconds: limit.as_secs(),
                            });
                        }
                    }
                    thread::sleep(POLL_INTERVAL);
                }
            }
        };

        let stdout = read_spool(&mut stdout_reader).map_err(|err| failed(err.to_string()))?;
        let stderr = read_spool(&mut stderr_reader).map_err(|err| failed(err.to_string()))?;
        if !stderr.trim().is_empty() {
            tracing::debug!(program = %program, stderr = %stderr.trim(), "tool stderr");
        }

        if status.success() {
            return Ok(ToolOutput { stdout, stderr });
        }
        let message = if stderr.trim().is_empty() {
            format!("exited with {status}")
        } else {
            stderr.trim().to_string()
        };
        Err(failed(message))
    }
}

fn read_spool(file: &mut fs::File) -> std::io::Result<String> {
    use std::io::{Read, Seek, SeekFrom};
    file.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Builders for every external operation the pipeline performs.
#[derive(Debug, Clone, Copy)]
pub struct Tools<'a> {
    env: &'a EnvironmentConfig,
}

impl<'a> Tools<'a> {
    pub fn new(env: &'a EnvironmentConfig) -> Self {
        Self { env }
    }

    /// `fslmaths in -thr lo -uthr hi out`
    pub fn threshold(&self, input: &Utf8Path, range: ThresholdRange, output: &Utf8Path) -> Invocation {
        Invocation::new(self.env.fsl_tool("fslmaths"))
            .path(input)
            .arg("-thr")
            .arg(range.lower.to_string())
            .arg("-uthr")
            .arg(range.upper.to_string())
            .path(output)
    }

    /// `fslmaths a -add b -bin out`
    pub fn union_binarize(&self, a: &Utf8Path, b: &Utf8Path, output: &Utf8Path) -> Invocation {
        Invocation::new(self.env.fsl_tool("fslmaths"))
            .path(a)
            .arg("-add")
            .path(b)
            .arg("-bin")
            .path(output)
    }

    /// `fslmaths in -kernel gauss <size> -ero out`
    pub fn erode(&self, input: &Utf8Path, kernel_size: u32, output: &Utf8Path) -> Invocation {
        Invocation::new(self.env.fsl_tool("fslmaths"))
            .path(input)
            .arg("-kernel")
            .arg("gauss")
            .arg(kernel_size.to_string())
            .arg("-ero")
            .path(output)
    }

    /// `fslmeants -i volume -o out -m mask`
    pub fn mask_mean(&self, volume: &Utf8Path, mask: &Utf8Path, output: &Utf8Path) -> Invocation {
        Invocation::new(self.env.fsl_tool("fslmeants"))
            .arg("-i")
            .path(volume)
            .arg("-o")
            .path(output)
            .arg("-m")
            .path(mask)
    }

    /// `fslhd volume`; the header dump carries `pixdim4` (TR).
    pub fn header(&self, volume: &Utf8Path) -> Invocation {
        Invocation::new(self.env.fsl_tool("fslhd")).path(volume)
    }

    pub fn regressor_check(&self, raw_series: &Utf8Path, regressors: &Utf8Path) -> Invocation {
        Invocation::new(self.env.python.clone())
            .path(&self.env.regressor_check)
            .arg("--fmri")
            .path(raw_series)
            .arg("--movmnt")
            .path(regressors)
    }

    /// Appends `series` to `merged` in place.
    pub fn cifti_merge(&self, merged: &Utf8Path, series: &Utf8Path) -> Invocation {
        Invocation::new(self.env.wb_command.clone())
            .arg("-cifti-merge")
            .path(merged)
            .arg("-cifti")
            .path(merged)
            .arg("-cifti")
            .path(series)
    }

    pub fn cifti_parcellate(&self, dense: &Utf8Path, label: &Utf8Path, output: &Utf8Path) -> Invocation {
        Invocation::new(self.env.wb_command.clone())
            .arg("-cifti-parcellate")
            .path(dense)
            .path(label)
            .arg("COLUMN")
            .path(output)
    }

    pub fn add_to_spec(&self, spec_file: &Utf8Path, data_file: &Utf8Path) -> Invocation {
        Invocation::new(self.env.wb_command.clone())
            .arg("-add-to-spec-file")
            .path(spec_file)
            .arg("INVALID")
            .path(data_file)
    }

    /// Runs `function('<config>')` inside Octave with the engine sources on
    /// the load path.
    pub fn engine(&self, code_dir: &Utf8Path, function: &str, config: &Utf8Path) -> Invocation {
        let mut invocation = Invocation::new(self.env.octave.clone())
            .arg("--traditional")
            .arg("--quiet")
            .arg("--path")
            .path(code_dir)
            .arg("--path")
            .path(&code_dir.join("scripts"));
        if function == "analyses_v2" {
            invocation = invocation.arg("--path").path(&self.env.hcp_mat_path);
        }
        invocation
            .arg("--eval")
            .arg(format!("{function}('{}')", config.as_str().replace('\'', "''")))
    }
}
