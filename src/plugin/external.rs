//! Plugins loaded from repository artifacts.
//!
//! An artifact is an executable speaking the protocol in
//! [`protocol`](super::protocol). Each call spawns a fresh process, which
//! gives every external plugin its own isolated address space: nothing it
//! loads can leak into the build or into other plugins.

use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::protocol::{FilePayload, Operation, PluginRequest, PluginResponse};
use super::{
    Capability, GenerateAfterList, GenerateBeforeList, OpenedFile, Plugin, PluginConfig,
    PluginContext, PluginDescriptor, PluginError, PluginKind, TransformAllFiles, TransformFiles,
    MATCH_ALL,
};

const PLUGIN_TARGET: &str = "rpbuild::plugin::external";

/// Default per-call timeout for external plugins.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Turns a cached artifact into a plugin instance.
pub trait PluginLoader: Send + Sync {
    fn load(&self, artifact: &Path) -> Result<Arc<dyn Plugin>, PluginError>;
}

/// Loads artifacts as [`ProcessPlugin`]s.
#[derive(Debug, Clone)]
pub struct ProcessPluginLoader {
    timeout_secs: u64,
}

impl ProcessPluginLoader {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs: timeout_secs.max(1) }
    }
}

impl Default for ProcessPluginLoader {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT_SECS)
    }
}

impl PluginLoader for ProcessPluginLoader {
    fn load(&self, artifact: &Path) -> Result<Arc<dyn Plugin>, PluginError> {
        Ok(Arc::new(ProcessPlugin::describe(artifact, self.timeout_secs)?))
    }
}

/// A plugin driven through a child process per call.
#[derive(Debug)]
pub struct ProcessPlugin {
    executable: PathBuf,
    descriptor: PluginDescriptor,
    glob: String,
    timeout_secs: u64,
}

impl ProcessPlugin {
    /// Ask the executable for its descriptor.
    pub fn describe(executable: &Path, timeout_secs: u64) -> Result<Self, PluginError> {
        let label = executable.display().to_string();
        let request = PluginRequest::new(Operation::Describe);
        let response = run(&label, executable, &request, timeout_secs)?;
        let glob = response.glob().unwrap_or(MATCH_ALL).to_string();
        let descriptor =
            response.descriptor().cloned().ok_or_else(|| PluginError::InvalidOutput {
                name: label.clone(),
                message: String::from("describe response carries no descriptor"),
            })?;
        if descriptor.name.is_empty() || descriptor.version.is_empty() {
            return Err(PluginError::InvalidOutput {
                name: label,
                message: String::from("descriptor needs a name and a version"),
            });
        }

        debug!(
            target: PLUGIN_TARGET,
            plugin = %descriptor,
            kind = %descriptor.kind,
            glob = %glob,
            "described external plugin"
        );

        Ok(Self { executable: executable.to_path_buf(), descriptor, glob, timeout_secs })
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    fn call(&self, request: &PluginRequest) -> Result<Vec<FilePayload>, PluginError> {
        let response = run(&self.descriptor.name, &self.executable, request, self.timeout_secs)?;
        Ok(response.into_files())
    }

    fn section_request(
        &self,
        operation: Operation,
        cx: &PluginContext,
        config: &PluginConfig,
    ) -> PluginRequest {
        PluginRequest::new(operation)
            .with_section(cx.project_name(), cx.section_dir().to_path_buf())
            .with_config(config.to_json())
    }

    fn payload(&self, file: &mut OpenedFile) -> Result<FilePayload, PluginError> {
        let name = file.name().to_owned();
        let content =
            file.content().map_err(|e| PluginError::io(&self.descriptor.name, e))?.to_vec();
        Ok(FilePayload::new(name, content))
    }
}

impl Plugin for ProcessPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn glob_pattern(&self) -> &str {
        &self.glob
    }

    fn initialize(&self) -> Result<(), PluginError> {
        self.call(&PluginRequest::new(Operation::Initialize)).map(|_| ())
    }

    fn capability(&self) -> Capability<'_> {
        match self.descriptor.kind {
            PluginKind::GenerateBeforeList => Capability::GenerateBeforeList(self),
            PluginKind::GenerateAfterList => Capability::GenerateAfterList(self),
            PluginKind::TransformFiles => Capability::TransformFiles(self),
            PluginKind::TransformAllFiles => Capability::TransformAllFiles(self),
        }
    }
}

impl GenerateBeforeList for ProcessPlugin {
    fn generate(
        &self,
        cx: &PluginContext,
        config: &PluginConfig,
    ) -> Result<Vec<OpenedFile>, PluginError> {
        let files = self.call(&self.section_request(Operation::Generate, cx, config))?;
        Ok(files
            .into_iter()
            .map(|f| {
                let (name, content) = f.into_parts();
                OpenedFile::generated(name, content)
            })
            .collect())
    }
}

impl GenerateAfterList for ProcessPlugin {
    fn generate_after(
        &self,
        cx: &PluginContext,
        config: &PluginConfig,
        files: &[PathBuf],
    ) -> Result<Vec<OpenedFile>, PluginError> {
        let listed = files
            .iter()
            .filter_map(|p| p.strip_prefix(cx.section_dir()).ok())
            .map(crate::section::slash_path)
            .collect();
        let request =
            self.section_request(Operation::GenerateAfter, cx, config).with_listed(listed);
        Ok(self
            .call(&request)?
            .into_iter()
            .map(|f| {
                let (name, content) = f.into_parts();
                OpenedFile::generated(name, content)
            })
            .collect())
    }
}

impl TransformFiles for ProcessPlugin {
    fn transform(
        &self,
        cx: &PluginContext,
        config: &PluginConfig,
        file: &mut OpenedFile,
    ) -> Result<(), PluginError> {
        let payload = self.payload(file)?;
        let request =
            self.section_request(Operation::Transform, cx, config).with_files(vec![payload]);
        let returned = self.call(&request)?;
        apply_returned(file, returned.into_iter().next())
    }
}

impl TransformAllFiles for ProcessPlugin {
    fn transform_all(
        &self,
        cx: &PluginContext,
        config: &PluginConfig,
        files: &mut [OpenedFile],
    ) -> Result<(), PluginError> {
        let payloads =
            files.iter_mut().map(|f| self.payload(f)).collect::<Result<Vec<_>, _>>()?;
        let request =
            self.section_request(Operation::TransformAll, cx, config).with_files(payloads);
        let mut returned = self.call(&request)?;
        for file in files.iter_mut() {
            let position = returned.iter().position(|p| p.name() == file.name());
            apply_returned(file, position.map(|i| returned.swap_remove(i)))?;
        }
        Ok(())
    }
}

/// Mark the file dirty only if the plugin actually changed its bytes.
fn apply_returned(file: &mut OpenedFile, returned: Option<FilePayload>) -> Result<(), PluginError> {
    let Some(payload) = returned else {
        return Ok(());
    };
    let (_, content) = payload.into_parts();
    let name = file.name().to_owned();
    let unchanged = file.content().map_err(|e| PluginError::io(&name, e))? == content.as_slice();
    if !unchanged {
        file.set_content(content);
    }
    Ok(())
}

/// Spawn the plugin, exchange one request/response pair, and reap it.
///
/// The request is written on its own thread, so a plugin that never drains
/// stdin is still bounded by the timeout.
fn run(
    name: &str,
    executable: &Path,
    request: &PluginRequest,
    timeout_secs: u64,
) -> Result<PluginResponse, PluginError> {
    let operation = request.operation().as_arg();
    let json = encode_request(name, request)?;
    debug!(
        target: PLUGIN_TARGET,
        plugin = name,
        executable = %executable.display(),
        operation,
        "spawning plugin process"
    );

    let mut child = Command::new(executable)
        .arg(operation)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| PluginError::SpawnFailed {
            name: name.to_owned(),
            message: err.to_string(),
        })?;

    let timeout = Duration::from_secs(timeout_secs);
    let deadline = Instant::now().checked_add(timeout);
    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stderr_thread = stderr.map(|reader| {
        let name = name.to_owned();
        thread::spawn(move || drain_stderr(&name, reader))
    });
    let writer = stdin.map(|stdin| spawn_writer(name, stdin, json));

    let line = match stdout {
        Some(stdout) => read_response(name, stdout, timeout),
        None => Err(PluginError::SpawnFailed {
            name: name.to_owned(),
            message: String::from("failed to capture stdout"),
        }),
    };
    let line = match line {
        Ok(line) => line,
        Err(err) => {
            abort(&mut child);
            return Err(err);
        }
    };

    if let Some(writer) = writer {
        let now = Instant::now();
        let remaining = deadline.map_or(timeout, |d| d.saturating_duration_since(now));
        let written = match writer.recv_timeout(remaining) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                Err(PluginError::Timeout { name: name.to_owned(), timeout_secs })
            }
            // writer thread is gone; the answer already arrived
            Err(RecvTimeoutError::Disconnected) => Ok(()),
        };
        if let Err(err) = written {
            abort(&mut child);
            return Err(err);
        }
    }

    wait_for_exit(name, &mut child, timeout_secs)?;
    if let Some(handle) = stderr_thread {
        drop(handle.join());
    }

    let response = parse_response(name, &line)?;
    if !response.is_success() {
        return Err(PluginError::Reported {
            name: name.to_owned(),
            message: response.message().unwrap_or("no message").to_owned(),
        });
    }
    Ok(response)
}

fn abort(child: &mut Child) {
    drop(child.kill());
    drop(child.wait());
}

fn encode_request(name: &str, request: &PluginRequest) -> Result<String, PluginError> {
    serde_json::to_string(request).map_err(|err| PluginError::InvalidOutput {
        name: name.to_owned(),
        message: format!("failed to serialise request: {err}"),
    })
}

/// Writes the request line on a helper thread and closes stdin.
fn spawn_writer(
    name: &str,
    stdin: ChildStdin,
    json: String,
) -> mpsc::Receiver<Result<(), PluginError>> {
    let (tx, rx) = mpsc::channel();
    let name = name.to_owned();
    thread::spawn(move || drop(tx.send(write_request(&name, stdin, &json))));
    rx
}

/// A plugin that exits without reading its input closes the pipe early; that
/// is not an error as long as it still answers.
fn write_request(name: &str, mut stdin: ChildStdin, json: &str) -> Result<(), PluginError> {
    debug!(target: PLUGIN_TARGET, plugin = name, request_bytes = json.len(), "writing request");

    let result = stdin
        .write_all(json.as_bytes())
        .and_then(|()| stdin.write_all(b"\n"))
        .and_then(|()| stdin.flush());
    match result {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(PluginError::io(name, err)),
    }
}

/// Reads one line from stdout on a helper thread so the timeout also covers a
/// plugin that never answers.
fn read_response(
    name: &str,
    stdout: impl Read + Send + 'static,
    timeout: Duration,
) -> Result<String, PluginError> {
    let start = Instant::now();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut line = String::new();
        let result = BufReader::new(stdout).read_line(&mut line).map(|_| line);
        drop(tx.send(result));
    });

    let line = match rx.recv_timeout(timeout) {
        Ok(result) => result.map_err(|err| PluginError::io(name, err))?,
        Err(_) => {
            warn!(
                target: PLUGIN_TARGET,
                plugin = name,
                timeout_secs = timeout.as_secs(),
                "plugin timed out, killing process"
            );
            return Err(PluginError::Timeout {
                name: name.to_owned(),
                timeout_secs: timeout.as_secs(),
            });
        }
    };

    debug!(
        target: PLUGIN_TARGET,
        plugin = name,
        bytes_read = line.len(),
        elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        "read response from plugin stdout"
    );

    if line.trim().is_empty() {
        return Err(PluginError::InvalidOutput {
            name: name.to_owned(),
            message: String::from("plugin produced no output on stdout"),
        });
    }
    Ok(line)
}

/// Drains stderr so the child never blocks on a full pipe.
fn drain_stderr(name: &str, reader: impl Read) {
    let mut buffer = String::new();
    if BufReader::new(reader).read_to_string(&mut buffer).is_ok() && !buffer.trim().is_empty() {
        debug!(
            target: PLUGIN_TARGET,
            plugin = name,
            stderr = %buffer.trim(),
            "plugin stderr output"
        );
    }
}

fn wait_for_exit(name: &str, child: &mut Child, timeout_secs: u64) -> Result<(), PluginError> {
    let start = Instant::now();
    let timeout = Duration::from_secs(timeout_secs);
    let poll_interval = Duration::from_millis(20);

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(target: PLUGIN_TARGET, plugin = name, ?status, "plugin process exited");
                if status.success() {
                    return Ok(());
                }
                return Err(PluginError::NonZeroExit {
                    name: name.to_owned(),
                    status: status.code().unwrap_or(-1),
                });
            }
            Ok(None) => {
                if start.elapsed() > timeout {
                    warn!(
                        target: PLUGIN_TARGET,
                        plugin = name,
                        timeout_secs,
                        "plugin did not exit, killing process"
                    );
                    drop(child.kill());
                    drop(child.wait());
                    return Err(PluginError::Timeout { name: name.to_owned(), timeout_secs });
                }
                thread::sleep(poll_interval);
            }
            Err(err) => return Err(PluginError::io(name, err)),
        }
    }
}

fn parse_response(name: &str, line: &str) -> Result<PluginResponse, PluginError> {
    serde_json::from_str(line.trim()).map_err(|err| PluginError::InvalidOutput {
        name: name.to_owned(),
        message: format!("invalid JSON response: {err}"),
    })
}
