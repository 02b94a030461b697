//! Running the external programs behind the stages and the upload hook.
//!
//! An [`Invocation`] resolves its program before spawning, feeds stdin while
//! stdout and stderr are drained, and holds the whole exchange (input,
//! output and exit) to a single deadline. A non-zero exit comes back as
//! [`CommandError::Failed`] carrying the tail of stderr.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};

/// Largest stdout accepted from a program (10 MiB).
const MAX_STDOUT_BYTES: usize = 10 * 1024 * 1024;

/// How much of stderr is kept for error messages.
const STDERR_TAIL_BYTES: usize = 2048;

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("program not found: {0}")]
    NotFound(String),

    #[error("cannot start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {secs}s")]
    Timeout { program: String, secs: u64 },

    /// `code` is `-1` when the program was killed by a signal.
    #[error("{program} exited with code {code}: {stderr}")]
    Failed {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("{program} wrote more than {limit} bytes to stdout")]
    OutputTooLarge { program: String, limit: usize },

    #[error("I/O error talking to {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Output of a program that exited successfully.
#[derive(Debug, Clone)]
pub struct Completed {
    pub stdout: String,
    /// Last [`STDERR_TAIL_BYTES`] of stderr, trimmed.
    pub stderr: String,
    pub elapsed: Duration,
}

/// One run of an external program.
#[derive(Debug, Clone)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
    stdin: Option<Vec<u8>>,
    timeout: Duration,
}

impl Invocation {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
            stdin: None,
            timeout,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.env.extend(vars);
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Bytes written to the program's stdin, which is closed afterwards.
    /// Without this stdin is `/dev/null`.
    pub fn stdin(mut self, bytes: Vec<u8>) -> Self {
        self.stdin = Some(bytes);
        self
    }

    /// Run to completion. On timeout the program is killed.
    pub async fn run(self) -> Result<Completed, CommandError> {
        let resolved = resolve_program(&self.program)
            .ok_or_else(|| CommandError::NotFound(self.program.clone()))?;

        let mut cmd = Command::new(&resolved);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| CommandError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let io = |source: std::io::Error| CommandError::Io {
            program: self.program.clone(),
            source,
        };

        let exchange = async {
            let (fed, stdout, stderr, status) = tokio::join!(
                feed(stdin, self.stdin.as_deref()),
                drain_capped(stdout, MAX_STDOUT_BYTES),
                drain_tail(stderr, STDERR_TAIL_BYTES),
                child.wait(),
            );
            let status = status.map_err(io)?;
            let stderr = String::from_utf8_lossy(&stderr.map_err(io)?).trim().to_string();
            if !status.success() {
                return Err(CommandError::Failed {
                    program: self.program.clone(),
                    code: status.code().unwrap_or(-1),
                    stderr,
                });
            }
            fed.map_err(io)?;
            let (stdout, overflow) = stdout.map_err(io)?;
            if overflow {
                return Err(CommandError::OutputTooLarge {
                    program: self.program.clone(),
                    limit: MAX_STDOUT_BYTES,
                });
            }
            Ok(Completed {
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr,
                elapsed: started.elapsed(),
            })
        };

        let outcome = tokio::time::timeout(self.timeout, exchange).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                if let Err(e) = child.start_kill() {
                    tracing::warn!(program = %self.program, error = %e, "Failed to kill timed out program");
                }
                Err(CommandError::Timeout {
                    program: self.program.clone(),
                    secs: self.timeout.as_secs(),
                })
            }
        }
    }
}

/// Locate `program` the way the OS would when spawning it.
///
/// Paths containing a separator must name an existing file and are made
/// absolute against the current directory; bare names are searched on `PATH`.
pub fn resolve_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        if !candidate.is_file() {
            return None;
        }
        if candidate.is_absolute() {
            return Some(candidate.to_path_buf());
        }
        return std::env::current_dir().ok().map(|cwd| cwd.join(candidate));
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|full| full.is_file())
}

async fn feed(pipe: Option<ChildStdin>, payload: Option<&[u8]>) -> std::io::Result<()> {
    let (Some(mut pipe), Some(bytes)) = (pipe, payload) else {
        return Ok(());
    };
    let written = pipe.write_all(bytes).await;
    drop(pipe);
    match written {
        // The program may exit without reading all of its input.
        Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}

/// Read `stream` to EOF, keeping the first `limit` bytes. The flag is set
/// when anything past the limit was discarded.
async fn drain_capped<R: AsyncRead + Unpin>(
    stream: Option<R>,
    limit: usize,
) -> std::io::Result<(Vec<u8>, bool)> {
    let mut kept = Vec::new();
    let mut overflow = false;
    let Some(mut stream) = stream else {
        return Ok((kept, overflow));
    };
    let mut chunk = vec![0; READ_CHUNK];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok((kept, overflow));
        }
        let room = limit.saturating_sub(kept.len());
        kept.extend_from_slice(&chunk[..n.min(room)]);
        overflow |= n > room;
    }
}

/// Read `stream` to EOF, keeping the last `limit` bytes.
async fn drain_tail<R: AsyncRead + Unpin>(stream: Option<R>, limit: usize) -> std::io::Result<Vec<u8>> {
    let mut tail = Vec::new();
    let Some(mut stream) = stream else {
        return Ok(tail);
    };
    let mut chunk = vec![0; READ_CHUNK];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        tail.extend_from_slice(&chunk[..n]);
        if tail.len() > 2 * limit {
            tail.drain(..tail.len() - limit);
        }
    }
    if tail.len() > limit {
        tail.drain(..tail.len() - limit);
    }
    Ok(tail)
}
