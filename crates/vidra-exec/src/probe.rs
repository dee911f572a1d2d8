use std::{path::PathBuf, process::Stdio, time::Duration};

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use vidra_batch::{ProbeError, ProbeExecutor, ProbeReport};
use vidra_model::{ProbeOptions, SourceType};

use crate::{ExecError, ProbeLimits, util};

const STDERR_TAIL: usize = 512;

/// [`ProbeExecutor`] that runs an external inspection tool per file.
///
/// The argument vector is `base_args`, then flags derived from [`ProbeOptions`],
/// then the custom arguments, then the path. No shell is involved.
#[derive(Debug, Clone)]
pub struct CommandProbe {
    pub program: String,
    pub base_args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    pub limits: ProbeLimits,
    /// Used when a file carries no `timeout_ms` of its own.
    pub default_timeout: Option<Duration>,
}

impl Default for CommandProbe {
    fn default() -> Self {
        Self {
            program: "ffprobe".into(),
            base_args: [
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ]
            .map(String::from)
            .to_vec(),
            env: Vec::new(),
            cwd: None,
            limits: ProbeLimits::default(),
            default_timeout: None,
        }
    }
}

impl CommandProbe {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn with_base_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_limits(mut self, limits: ProbeLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Sources this executor can read directly.
    pub fn supports(&self, source_type: SourceType) -> bool {
        matches!(
            source_type,
            SourceType::Local | SourceType::Url | SourceType::Upload | SourceType::Stream
        )
    }

    pub fn build_args(&self, path: &str, options: &ProbeOptions) -> Vec<String> {
        let mut args: Vec<String> = self
            .base_args
            .iter()
            .filter(|a| match a.as_str() {
                "-show_streams" => options.show_streams != Some(false),
                "-show_format" => options.show_format != Some(false),
                _ => true,
            })
            .cloned()
            .collect();

        let mut flag = |enabled: Option<bool>, name: &str| {
            if enabled == Some(true) && !args.iter().any(|a| a == name) {
                args.push(name.to_string());
            }
        };
        flag(options.show_streams, "-show_streams");
        flag(options.show_format, "-show_format");
        flag(options.count_frames, "-count_frames");

        args.extend(options.custom_args.iter().cloned());
        // A leading dash would be read as an option.
        if path.starts_with('-') {
            args.push(format!("./{path}"));
        } else {
            args.push(path.to_string());
        }
        args
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        self.limits.apply(&mut cmd);
        cmd
    }

    /// Run the tool once and return its stdout.
    pub async fn exec(
        &self,
        args: &[String],
        ctx: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, ExecError> {
        if self.program.is_empty() {
            return Err(ExecError::MissingProgram);
        }
        trace!(program = %self.program, ?args, "spawn");

        let mut child = self
            .command(args)
            .spawn()
            .map_err(|e| ExecError::Spawn(format!("{}: {e}", self.program)))?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = async {
            match timeout {
                Some(t) => tokio::time::sleep(t).await,
                None => std::future::pending().await,
            }
        };

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = ctx.cancelled() => {
                debug!(program = %self.program, "cancelled; killing child");
                util::kill_graceful(&mut child).await?;
                return Err(ExecError::Cancelled);
            }
            _ = deadline => {
                let ms = timeout.map(|t| t.as_millis() as u64).unwrap_or_default();
                debug!(program = %self.program, timeout_ms = ms, "deadline reached; killing child");
                util::kill_graceful(&mut child).await?;
                return Err(ExecError::Timeout(ms));
            }
        };

        let out = collect(stdout).await?;
        if status.success() {
            return Ok(out);
        }

        let err = collect(stderr).await?;
        let stderr = util::tail(&String::from_utf8_lossy(&err), STDERR_TAIL);
        Err(match status.code() {
            Some(code) => ExecError::NonZeroExit { code, stderr },
            None => ExecError::KilledBySignal { stderr },
        })
    }
}

#[async_trait]
impl ProbeExecutor for CommandProbe {
    async fn analyze(
        &self,
        path: &str,
        source_type: SourceType,
        options: &ProbeOptions,
        ctx: CancellationToken,
    ) -> Result<ProbeReport, ProbeError> {
        if !self.supports(source_type) {
            return Err(ProbeError::Unsupported(format!(
                "{} cannot read {} sources",
                self.program,
                source_type.as_str()
            )));
        }

        let args = self.build_args(path, options);
        let timeout = options
            .timeout_ms
            .map(Duration::from_millis)
            .or(self.default_timeout);

        let out = self.exec(&args, &ctx, timeout).await?;
        serde_json::from_slice(&out).map_err(|e| ProbeError::InvalidOutput(e.to_string()))
    }
}

fn drain<R>(pipe: Option<R>) -> JoinHandle<std::io::Result<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf).await?;
        }
        Ok(buf)
    })
}

async fn collect(handle: JoinHandle<std::io::Result<Vec<u8>>>) -> Result<Vec<u8>, ExecError> {
    handle
        .await
        .map_err(|e| ExecError::Io(format!("pipe reader: {e}")))?
        .map_err(ExecError::from)
}
