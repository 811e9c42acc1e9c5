//! Process supervisor: spawns one program, restarts it per policy, stops it in two phases

use crate::config::{expand, mergevars, Environment, GroupNames, ProgramConfig, RestartSetting};
use crate::runtime::group::GroupInfo;
use crate::runtime::output::{Color, Output};
use crate::runtime::privilege::Demotion;
use indexmap::IndexMap;
use nix::fcntl::OFlag;
use nix::sys::signal::{self, Signal};
use nix::unistd::{self, Pid};
use std::os::fd::OwnedFd;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::pipe;
use tokio::process::{Child, Command};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Pause between an exit and the next attempt
pub const RESTART_BACKOFF: Duration = Duration::from_secs(1);

/// Default graceful-stop window before escalating to SIGKILL
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// What happens after a program exits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Run once
    Never,
    /// Restart until stopped
    Always,
    /// Give up once this many attempts have been made
    Attempts(u32),
}

impl From<RestartSetting> for RestartPolicy {
    fn from(setting: RestartSetting) -> Self {
        match setting {
            RestartSetting::Flag(false) | RestartSetting::Attempts(0) => RestartPolicy::Never,
            RestartSetting::Flag(true) => RestartPolicy::Always,
            RestartSetting::Attempts(n) => RestartPolicy::Attempts(n),
        }
    }
}

impl std::fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestartPolicy::Never => write!(f, "never"),
            RestartPolicy::Always => write!(f, "always"),
            RestartPolicy::Attempts(n) => write!(f, "up to {} attempts", n),
        }
    }
}

/// Fully resolved program definition.
///
/// Built once from the launch file with the enclosing group's defaults applied.
/// Plugins may rewrite it (usually `command`) before the program is started.
#[derive(Debug, Clone)]
pub struct ProgramSpec {
    /// Identifier, unique within the group
    pub name: String,
    /// Command line template
    pub command: String,
    /// Working directory template (`.` when unset)
    pub directory: Option<String>,
    /// Environment overlay, already merged with the group environment
    pub environment: Environment,
    /// Group health depends on this program
    pub required: bool,
    pub restart: RestartPolicy,
    pub user: Option<String>,
    pub group: Option<GroupNames>,
    /// Echo output lines to the console
    pub console: bool,
    pub depends: Vec<String>,
    pub log: Option<PathBuf>,
    pub log_append: bool,
    /// Wait before the first attempt
    pub delay: Duration,
    /// Unrecognized launch file keys, for plugins
    pub options: IndexMap<String, serde_yaml::Value>,
}

impl ProgramSpec {
    /// Minimal program description running `command` once
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            directory: None,
            environment: Environment::new(),
            required: false,
            restart: RestartPolicy::Never,
            user: None,
            group: None,
            console: true,
            depends: Vec::new(),
            log: None,
            log_append: false,
            delay: Duration::ZERO,
            options: IndexMap::new(),
        }
    }

    /// Resolve a program entry against its enclosing group
    pub fn resolve(name: &str, config: &ProgramConfig, group: &GroupInfo) -> Self {
        let log = config
            .log
            .as_ref()
            .map(PathBuf::from)
            .or_else(|| group.log.as_ref().map(|dir| dir.join(format!("{}.log", name))));

        Self {
            name: name.to_string(),
            command: config.command.clone().unwrap_or_default(),
            directory: config.directory.clone(),
            environment: mergevars(&group.environment, &config.environment),
            required: config.required,
            restart: config.restart.into(),
            user: config.user.clone().or_else(|| group.user.clone()),
            group: config.group.clone().or_else(|| group.group.clone()),
            console: config.console,
            depends: config.depends.clone(),
            log,
            log_append: config.logappend,
            delay: Duration::try_from_secs_f64(config.delay).unwrap_or_default(),
            options: config.options.clone(),
        }
    }

    /// Raw plugin option
    pub fn option(&self, key: &str) -> Option<&serde_yaml::Value> {
        self.options.get(key)
    }

    /// Boolean plugin option, false when absent or not a boolean
    pub fn option_flag(&self, key: &str) -> bool {
        self.option(key)
            .and_then(serde_yaml::Value::as_bool)
            .unwrap_or(false)
    }

    /// Plugin option given in seconds
    pub fn option_duration(&self, key: &str) -> Option<Duration> {
        self.option(key)
            .and_then(serde_yaml::Value::as_f64)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    /// Process environment with the overlay applied, overlay values expanded
    pub fn materialized_environment(&self) -> Environment {
        let mut environment: Environment = std::env::vars().collect();
        let none = Environment::new();
        for (key, value) in &self.environment {
            environment.insert(key.clone(), expand(value, &none));
        }
        environment
    }

    /// Expanded argument vector
    pub fn argv(
        &self,
        environment: &Environment,
        line_buffering: bool,
    ) -> Result<Vec<String>, ProcessError> {
        let command = expand(&self.command, environment);
        let mut argv =
            shell_words::split(&command).map_err(|source| ProcessError::InvalidCommand {
                command: command.clone(),
                source,
            })?;

        if argv.is_empty() {
            return Err(ProcessError::EmptyCommand);
        }

        if line_buffering && self.console && cfg!(target_os = "linux") {
            argv.insert(0, "-oL".to_string());
            argv.insert(0, "stdbuf".to_string());
        }

        Ok(argv)
    }

    /// Expanded working directory
    pub fn working_directory(&self, environment: &Environment) -> PathBuf {
        PathBuf::from(expand(self.directory.as_deref().unwrap_or("."), environment))
    }
}

/// How one attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Normal exit with a status code
    Exited(i32),
    /// Terminated by a signal
    Signaled(i32),
    /// The program could not be run at all
    Error(String),
}

impl From<ExitStatus> for ExitOutcome {
    fn from(status: ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        match (status.code(), status.signal()) {
            (Some(code), _) => ExitOutcome::Exited(code),
            (None, Some(signal)) => ExitOutcome::Signaled(signal),
            (None, None) => ExitOutcome::Error(format!("unrecognized exit status {}", status)),
        }
    }
}

impl std::fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitOutcome::Exited(code) => write!(f, "Program has stopped (exit code {})", code),
            ExitOutcome::Signaled(signal) => write!(f, "Program was stopped by signal {}", signal),
            ExitOutcome::Error(_) => write!(f, "Execution stopped because of an error"),
        }
    }
}

/// Coarse program status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramStatus {
    /// Never attempted
    Idle,
    /// Supervisor active (child alive, restarting, or waiting out its delay)
    Running,
    /// Ran at least once and is no longer supervised
    Stopped,
}

/// State shared between a program handle and its lifecycle task
#[derive(Debug, Default)]
pub struct ProgramState {
    running: AtomicBool,
    attempts: AtomicU32,
    pid: Mutex<Option<u32>>,
    pgid: Mutex<Option<u32>>,
    outcome: Mutex<Option<ExitOutcome>>,
    wake: Notify,
}

impl ProgramState {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// PID of the live child, if any
    pub fn pid(&self) -> Option<u32> {
        *lock(&self.pid)
    }

    /// Process group of the current attempt. Outlives the leader until the
    /// output stream closes.
    pub fn process_group(&self) -> Option<u32> {
        *lock(&self.pgid)
    }

    pub fn last_outcome(&self) -> Option<ExitOutcome> {
        lock(&self.outcome).clone()
    }

    fn set_pid(&self, pid: Option<u32>) {
        *lock(&self.pid) = pid;
    }

    fn set_process_group(&self, pgid: Option<u32>) {
        *lock(&self.pgid) = pgid;
    }

    fn set_outcome(&self, outcome: ExitOutcome) {
        *lock(&self.outcome) = Some(outcome);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A supervised program
pub struct Program {
    spec: ProgramSpec,
    demotion: Demotion,
    color: Color,
    output: Arc<Output>,
    stop_timeout: Duration,
    line_buffering: bool,
    state: Arc<ProgramState>,
    task: Option<JoinHandle<()>>,
}

impl Program {
    /// Create a supervisor; user and group names are resolved here, once
    pub fn new(spec: ProgramSpec, color: Color, output: Arc<Output>) -> Self {
        let demotion = Demotion::resolve(spec.user.as_deref(), spec.group.as_ref());

        Self {
            spec,
            demotion,
            color,
            output,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            line_buffering: true,
            state: Arc::new(ProgramState::default()),
            task: None,
        }
    }

    /// Graceful-stop window
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Wrap console programs in `stdbuf -oL` on Linux
    pub fn with_line_buffering(mut self, enabled: bool) -> Self {
        self.line_buffering = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ProgramSpec {
        &self.spec
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn demotion(&self) -> &Demotion {
        &self.demotion
    }

    pub fn state(&self) -> &ProgramState {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn attempts(&self) -> u32 {
        self.state.attempts()
    }

    pub fn last_outcome(&self) -> Option<ExitOutcome> {
        self.state.last_outcome()
    }

    pub fn status(&self) -> ProgramStatus {
        if self.state.is_running() {
            ProgramStatus::Running
        } else if self.state.attempts() == 0 {
            ProgramStatus::Idle
        } else {
            ProgramStatus::Stopped
        }
    }

    /// Running, or never attempted
    pub fn valid(&self) -> bool {
        self.state.is_running() || self.state.attempts() == 0
    }

    /// Print a tagged status line on the console
    pub fn announce(&self, message: &str) {
        self.output.line(&self.spec.name, self.color, message);
    }

    /// Launch the lifecycle task. No effect while already running.
    pub fn start(&mut self) {
        if self.state.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let lifecycle = Lifecycle {
            spec: self.spec.clone(),
            demotion: self.demotion.clone(),
            color: self.color,
            output: self.output.clone(),
            line_buffering: self.line_buffering,
            state: self.state.clone(),
        };

        log::debug!("[{}] Launching supervisor", self.spec.name);
        self.task = Some(tokio::spawn(lifecycle.run()));
    }

    /// Stop the program.
    ///
    /// Unless forced, the child gets SIGTERM and the lifecycle task is given
    /// the stop window to finish. If the leader already exited, its process
    /// group gets the SIGTERM instead. Whatever is still holding the attempt
    /// open afterwards is killed together with its process group.
    pub async fn stop(&mut self, force: bool) {
        let was_running = self.state.running.swap(false, Ordering::SeqCst);
        self.state.wake.notify_waiters();

        if was_running && !force {
            if let Some(pid) = self.state.pid() {
                self.announce("Stopping program.");
                if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                    log::debug!("[{}] SIGTERM to {} failed: {}", self.spec.name, pid, e);
                }
            } else if let Some(pgid) = self.state.process_group() {
                self.announce("Stopping program.");
                if let Err(e) = signal::killpg(Pid::from_raw(pgid as i32), Signal::SIGTERM) {
                    log::debug!("[{}] SIGTERM to group {} failed: {}", self.spec.name, pgid, e);
                }
            }

            if let Some(task) = self.task.as_mut() {
                if tokio::time::timeout(self.stop_timeout, task).await.is_ok() {
                    self.task = None;
                }
            }
        }

        let unfinished = self.task.as_ref().is_some_and(|task| !task.is_finished());
        let pgid = self.state.process_group().filter(|_| unfinished);
        let pid = self.state.pid();
        if pgid.is_some() || pid.is_some() {
            self.announce("Escalating, killing program.");
            let killed = pgid.is_some_and(|pgid| {
                signal::killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL).is_ok()
            });
            if let (false, Some(pid)) = (killed, pid) {
                if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                    log::debug!("[{}] SIGKILL to {} failed: {}", self.spec.name, pid, e);
                }
            }
        }

        if let Some(task) = self.task.take() {
            // Descendants that left the process group can keep the stream open
            let abort = task.abort_handle();
            if tokio::time::timeout(self.stop_timeout, task).await.is_err() {
                log::warn!(
                    "[{}] Output stream still open after kill, abandoning it",
                    self.spec.name
                );
                abort.abort();
            }
        }
    }
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Program")
            .field("name", &self.spec.name)
            .field("status", &self.status())
            .field("attempts", &self.attempts())
            .finish_non_exhaustive()
    }
}

/// Everything the lifecycle task owns
struct Lifecycle {
    spec: ProgramSpec,
    demotion: Demotion,
    color: Color,
    output: Arc<Output>,
    line_buffering: bool,
    state: Arc<ProgramState>,
}

impl Lifecycle {
    async fn run(self) {
        let mut logfile = self.open_log().await;

        if !self.spec.delay.is_zero() && !self.pause(self.spec.delay).await {
            self.state.running.store(false, Ordering::SeqCst);
            return;
        }

        while self.state.is_running() {
            let attempt = self.state.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            self.announce(&mut logfile, &format!("Starting program (attempt {})", attempt))
                .await;

            let outcome = self.attempt(&mut logfile).await;
            if let ExitOutcome::Error(message) = &outcome {
                self.announce(&mut logfile, &format!("Error: {}", message))
                    .await;
            }
            self.announce(&mut logfile, &outcome.to_string()).await;
            self.state.set_outcome(outcome);

            if !self.state.is_running() {
                break;
            }

            match self.spec.restart {
                RestartPolicy::Never => break,
                RestartPolicy::Attempts(limit) if attempt >= limit => {
                    self.announce(&mut logfile, "Maximum number of attempts reached, giving up.")
                        .await;
                    break;
                }
                _ => {}
            }

            self.announce(&mut logfile, "Restarting program.").await;
            if !self.pause(RESTART_BACKOFF).await {
                break;
            }
        }

        self.state.running.store(false, Ordering::SeqCst);

        if let Some(file) = logfile.as_mut() {
            if let Err(e) = file.flush().await {
                log::debug!("[{}] Failed to flush log file: {}", self.spec.name, e);
            }
        }
    }

    /// Sleep unless a stop arrives first; true when still running afterwards
    async fn pause(&self, duration: Duration) -> bool {
        let notified = self.state.wake.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if !self.state.is_running() {
            return false;
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = notified => {}
        }

        self.state.is_running()
    }

    async fn attempt(&self, logfile: &mut Option<File>) -> ExitOutcome {
        let (mut child, stream) = match self.spawn() {
            Ok(spawned) => spawned,
            Err(e) => {
                log::warn!("[{}] {}", self.spec.name, e);
                return ExitOutcome::Error(e.to_string());
            }
        };

        if let Some(pid) = child.id() {
            // The child leads its own group, see `Demotion::apply`
            self.state.set_pid(Some(pid));
            self.state.set_process_group(Some(pid));
            self.announce(logfile, &format!("PID = {}", pid)).await;
        }

        let state = &self.state;
        let wait = async {
            let status = child.wait().await;
            state.set_pid(None);
            status
        };

        let ((), status) = tokio::join!(self.drain(stream, logfile), wait);
        self.state.set_process_group(None);

        match status {
            Ok(status) => ExitOutcome::from(status),
            Err(e) => ExitOutcome::Error(e.to_string()),
        }
    }

    fn spawn(&self) -> Result<(Child, pipe::Receiver), ProcessError> {
        let environment = self.spec.materialized_environment();
        let argv = self.spec.argv(&environment, self.line_buffering)?;
        let directory = self.spec.working_directory(&environment);

        let (reader, writer): (OwnedFd, OwnedFd) = unistd::pipe2(OFlag::O_CLOEXEC)?;
        let stderr = writer.try_clone()?;

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .env_clear()
            .envs(&environment)
            .current_dir(&directory)
            .stdin(Stdio::null())
            .stdout(Stdio::from(writer))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);
        self.demotion.install(&mut cmd);

        log::debug!(
            "[{}] Spawning {:?} in {}",
            self.spec.name,
            argv,
            directory.display()
        );

        let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: argv[0].clone(),
            source,
        })?;
        // Close our copies of the write end so the stream ends with the child
        drop(cmd);

        let stream = pipe::Receiver::from_owned_fd(reader)?;
        Ok((child, stream))
    }

    async fn drain(&self, stream: pipe::Receiver, logfile: &mut Option<File>) {
        let mut reader = BufReader::new(stream);
        let mut buffer = Vec::new();

        loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buffer);
                    let line = line.trim_end_matches(['\n', '\r']);
                    if self.spec.console {
                        self.output.line(&self.spec.name, self.color, line);
                    }
                    write_log(&self.spec.name, logfile, line).await;
                }
                Err(e) => {
                    log::debug!("[{}] Output stream error: {}", self.spec.name, e);
                    break;
                }
            }
        }
    }

    async fn announce(&self, logfile: &mut Option<File>, message: &str) {
        self.output.line(&self.spec.name, self.color, message);
        write_log(&self.spec.name, logfile, message).await;
    }

    async fn open_log(&self) -> Option<File> {
        let path = self.spec.log.as_ref()?;

        match open_log_file(path, self.spec.log_append).await {
            Ok(file) => Some(file),
            Err(e) => {
                log::warn!(
                    "[{}] Cannot open log file {}: {}",
                    self.spec.name,
                    path.display(),
                    e
                );
                None
            }
        }
    }
}

async fn open_log_file(path: &std::path::Path, append: bool) -> std::io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut options = OpenOptions::new();
    options.create(true);
    if append {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }

    let mut file = options.open(path).await?;
    if append {
        let header = format!(
            "\n----- Starting log at {} ------\n\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.6f")
        );
        file.write_all(header.as_bytes()).await?;
    }

    Ok(file)
}

async fn write_log(name: &str, logfile: &mut Option<File>, line: &str) {
    let Some(file) = logfile.as_mut() else {
        return;
    };

    let mut record = String::with_capacity(line.len() + 1);
    record.push_str(line);
    record.push('\n');

    if let Err(e) = file.write_all(record.as_bytes()).await {
        log::warn!("[{}] Failed to write log file: {}", name, e);
        *logfile = None;
        return;
    }
    if let Err(e) = file.flush().await {
        log::debug!("[{}] Failed to flush log file: {}", name, e);
    }
}

/// Reasons an attempt could not start a child
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Command is empty")]
    EmptyCommand,

    #[error("Cannot parse command '{command}': {source}")]
    InvalidCommand {
        command: String,
        #[source]
        source: shell_words::ParseError,
    },

    #[error("Failed to create output pipe: {0}")]
    Pipe(#[from] nix::Error),

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::output::testing::SharedBuffer;
    use std::time::Instant;

    fn program(spec: ProgramSpec) -> (Program, SharedBuffer) {
        let capture = SharedBuffer::default();
        let output = Arc::new(Output::new(capture.clone(), false));
        let program = Program::new(spec, Color::Green, output)
            .with_line_buffering(false)
            .with_stop_timeout(Duration::from_millis(500));
        (program, capture)
    }

    async fn wait_until_stopped(program: &Program) {
        for _ in 0..200 {
            if !program.is_running() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("program '{}' is still running", program.name());
    }

    async fn wait_for_output(capture: &SharedBuffer, needle: &str) {
        for _ in 0..200 {
            if capture.text().contains(needle) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("never saw {:?} in:\n{}", needle, capture.text());
    }

    #[test]
    fn test_restart_policy_from_setting() {
        assert_eq!(
            RestartPolicy::from(RestartSetting::Flag(false)),
            RestartPolicy::Never
        );
        assert_eq!(
            RestartPolicy::from(RestartSetting::Flag(true)),
            RestartPolicy::Always
        );
        assert_eq!(
            RestartPolicy::from(RestartSetting::Attempts(3)),
            RestartPolicy::Attempts(3)
        );
        assert_eq!(
            RestartPolicy::from(RestartSetting::Attempts(0)),
            RestartPolicy::Never
        );
    }

    #[test]
    fn test_resolve_inherits_group_defaults() {
        let mut group = GroupInfo::new("root");
        group.log = Some(PathBuf::from("/var/log/ignite"));
        group.user = Some("nobody".into());
        group
            .environment
            .insert("BASE".into(), "/opt".into());

        let config = ProgramConfig {
            command: Some("server".into()),
            environment: [("BIN".to_string(), "$BASE/bin".to_string())]
                .into_iter()
                .collect(),
            delay: 1.5,
            ..Default::default()
        };

        let spec = ProgramSpec::resolve("web", &config, &group);
        assert_eq!(spec.log, Some(PathBuf::from("/var/log/ignite/web.log")));
        assert_eq!(spec.user.as_deref(), Some("nobody"));
        assert_eq!(spec.environment.get("BIN").map(String::as_str), Some("/opt/bin"));
        assert_eq!(spec.environment.get("BASE").map(String::as_str), Some("/opt"));
        assert_eq!(spec.delay, Duration::from_millis(1500));
        assert!(spec.console);
    }

    #[test]
    fn test_argv_is_split_without_a_shell() {
        let mut spec = ProgramSpec::new("echo", "printf '%s|' \"$WORD with space\" tail");
        spec.environment.insert("WORD".into(), "hello".into());

        let environment = spec.materialized_environment();
        let argv = spec.argv(&environment, false).unwrap();
        assert_eq!(argv, vec!["printf", "%s|", "hello with space", "tail"]);
    }

    #[test]
    fn test_argv_line_buffering_prefix() {
        let spec = ProgramSpec::new("cat", "cat");
        let argv = spec.argv(&Environment::new(), true).unwrap();

        if cfg!(target_os = "linux") {
            assert_eq!(argv, vec!["stdbuf", "-oL", "cat"]);
        } else {
            assert_eq!(argv, vec!["cat"]);
        }

        let mut quiet = spec.clone();
        quiet.console = false;
        assert_eq!(quiet.argv(&Environment::new(), true).unwrap(), vec!["cat"]);
    }

    #[test]
    fn test_argv_errors() {
        let empty = ProgramSpec::new("empty", "   ");
        assert!(matches!(
            empty.argv(&Environment::new(), false),
            Err(ProcessError::EmptyCommand)
        ));

        let unbalanced = ProgramSpec::new("bad", "echo 'oops");
        assert!(matches!(
            unbalanced.argv(&Environment::new(), false),
            Err(ProcessError::InvalidCommand { .. })
        ));
    }

    #[test]
    fn test_option_helpers() {
        let mut spec = ProgramSpec::new("x", "true");
        spec.options.insert("debug".into(), serde_yaml::Value::Bool(true));
        spec.options
            .insert("wait".into(), serde_yaml::from_str("2").unwrap());

        assert!(spec.option_flag("debug"));
        assert!(!spec.option_flag("missing"));
        assert_eq!(spec.option_duration("wait"), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_exit_outcome_messages() {
        assert_eq!(
            ExitOutcome::Exited(3).to_string(),
            "Program has stopped (exit code 3)"
        );
        assert_eq!(
            ExitOutcome::Signaled(15).to_string(),
            "Program was stopped by signal 15"
        );
        assert_eq!(
            ExitOutcome::Error("boom".into()).to_string(),
            "Execution stopped because of an error"
        );
    }

    #[tokio::test]
    async fn test_valid_before_start() {
        let (program, _) = program(ProgramSpec::new("idle", "true"));
        assert!(program.valid());
        assert_eq!(program.status(), ProgramStatus::Idle);
        assert_eq!(program.attempts(), 0);
    }

    #[tokio::test]
    async fn test_run_once() {
        let (mut program, capture) = program(ProgramSpec::new("once", "sh -c 'echo hello'"));

        program.start();
        wait_until_stopped(&program).await;

        assert_eq!(program.attempts(), 1);
        assert_eq!(program.last_outcome(), Some(ExitOutcome::Exited(0)));
        assert_eq!(program.status(), ProgramStatus::Stopped);
        assert!(!program.valid());

        let text = capture.text();
        assert!(text.contains("Starting program (attempt 1)"));
        assert!(text.contains("]: hello\n"));
        assert!(text.contains("Program has stopped (exit code 0)"));
        assert!(!text.contains("Restarting program."));
    }

    #[tokio::test]
    async fn test_bounded_restart_gives_up() {
        let mut spec = ProgramSpec::new("flaky", "sh -c 'exit 1'");
        spec.restart = RestartPolicy::Attempts(3);
        let (mut program, capture) = program(spec);

        program.start();
        wait_until_stopped(&program).await;

        assert_eq!(program.attempts(), 3);
        assert_eq!(program.last_outcome(), Some(ExitOutcome::Exited(1)));
        assert!(!program.valid());

        let text = capture.text();
        assert!(text.contains("Starting program (attempt 3)"));
        assert!(!text.contains("Starting program (attempt 4)"));
        assert!(text.contains("Maximum number of attempts reached, giving up."));
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let (mut program, capture) = program(ProgramSpec::new("twice", "sleep 30"));

        program.start();
        program.start();
        wait_for_output(&capture, "PID = ").await;
        assert!(program.valid());
        assert_eq!(program.attempts(), 1);

        program.stop(false).await;
        assert_eq!(program.attempts(), 1);

        let text = capture.text();
        assert_eq!(text.matches("Starting program (attempt").count(), 1);
        assert_eq!(text.matches("PID = ").count(), 1);
    }

    async fn wait_until_leader_exits(program: &Program) {
        for _ in 0..200 {
            if program.state().pid().is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("leader of '{}' never exited", program.name());
    }

    #[tokio::test]
    async fn test_stop_reaches_orphaned_group_members() {
        let spec = ProgramSpec::new("orphans", "sh -c 'sleep 30 & echo started'");
        let (mut program, capture) = program(spec);

        program.start();
        wait_for_output(&capture, "]: started").await;
        wait_until_leader_exits(&program).await;

        assert!(program.is_running());
        assert!(program.state().process_group().is_some());

        let started = Instant::now();
        program.stop(false).await;

        // The stream only closes once the background sleep is gone
        assert!(started.elapsed() < Duration::from_millis(900));
        assert!(program.state().process_group().is_none());
        assert_eq!(program.status(), ProgramStatus::Stopped);
        let text = capture.text();
        assert!(text.contains("Stopping program."));
        assert!(text.contains("Program has stopped (exit code 0)"));
    }

    #[tokio::test]
    async fn test_forced_stop_kills_orphaned_group_members() {
        let spec = ProgramSpec::new("orphans", "sh -c 'sleep 30 & echo started'");
        let (mut program, capture) = program(spec);

        program.start();
        wait_for_output(&capture, "]: started").await;
        wait_until_leader_exits(&program).await;

        program.stop(true).await;

        assert!(program.state().process_group().is_none());
        let text = capture.text();
        assert!(text.contains("Escalating, killing program."));
        assert!(text.contains("Program has stopped (exit code 0)"));
    }

    #[tokio::test]
    async fn test_graceful_stop_does_not_restart() {
        let mut spec = ProgramSpec::new("sleeper", "sleep 30");
        spec.restart = RestartPolicy::Always;
        let (mut program, capture) = program(spec);

        program.start();
        wait_for_output(&capture, "PID = ").await;

        let started = Instant::now();
        program.stop(false).await;

        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(!program.is_running());
        assert_eq!(program.attempts(), 1);
        assert_eq!(
            program.last_outcome(),
            Some(ExitOutcome::Signaled(Signal::SIGTERM as i32))
        );
        assert!(capture.text().contains("Stopping program."));
        assert!(!capture.text().contains("Escalating, killing program."));
    }

    #[tokio::test]
    async fn test_stubborn_program_is_killed() {
        let spec = ProgramSpec::new(
            "stubborn",
            "sh -c \"trap '' TERM; echo ready; while true; do sleep 0.1; done\"",
        );
        let (mut program, capture) = program(spec);

        program.start();
        wait_for_output(&capture, "ready").await;

        let started = Instant::now();
        program.stop(false).await;

        assert!(started.elapsed() >= Duration::from_millis(500));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(
            program.last_outcome(),
            Some(ExitOutcome::Signaled(Signal::SIGKILL as i32))
        );
        assert!(capture.text().contains("Escalating, killing program."));
    }

    #[tokio::test]
    async fn test_forced_stop_kills_immediately() {
        let (mut program, capture) = program(ProgramSpec::new("forced", "sleep 30"));

        program.start();
        wait_for_output(&capture, "PID = ").await;

        program.stop(true).await;

        assert!(!program.is_running());
        assert_eq!(
            program.last_outcome(),
            Some(ExitOutcome::Signaled(Signal::SIGKILL as i32))
        );
        assert!(!capture.text().contains("Stopping program."));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_an_outcome() {
        let (mut program, capture) =
            program(ProgramSpec::new("missing", "/nonexistent/ignite-test-binary"));

        program.start();
        wait_until_stopped(&program).await;

        assert_eq!(program.attempts(), 1);
        assert!(matches!(program.last_outcome(), Some(ExitOutcome::Error(_))));
        assert!(!program.valid());
        assert!(capture
            .text()
            .contains("Execution stopped because of an error"));
    }

    #[tokio::test]
    async fn test_stop_interrupts_delay() {
        let mut spec = ProgramSpec::new("late", "true");
        spec.delay = Duration::from_secs(30);
        let (mut program, _) = program(spec);

        program.start();
        assert_eq!(program.status(), ProgramStatus::Running);

        let started = Instant::now();
        program.stop(false).await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(program.attempts(), 0);
        assert!(!program.is_running());
    }

    #[tokio::test]
    async fn test_environment_and_directory() {
        let dir = tempfile::tempdir().unwrap();
        let canonical = dir.path().canonicalize().unwrap();

        let mut spec = ProgramSpec::new("env", "sh -c 'pwd; echo $GREETING'");
        spec.directory = Some(canonical.display().to_string());
        spec.environment.insert("GREETING".into(), "hi there".into());
        let (mut program, capture) = program(spec);

        program.start();
        wait_until_stopped(&program).await;

        let text = capture.text();
        assert!(text.contains(&format!("]: {}\n", canonical.display())));
        assert!(text.contains("]: hi there\n"));
    }

    #[tokio::test]
    async fn test_stdout_and_stderr_are_combined() {
        let (mut program, capture) =
            program(ProgramSpec::new("both", "sh -c 'echo out; echo err >&2'"));

        program.start();
        wait_until_stopped(&program).await;

        let text = capture.text();
        assert!(text.contains("]: out\n"));
        assert!(text.contains("]: err\n"));
    }

    #[tokio::test]
    async fn test_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("greeter.log");

        let mut spec = ProgramSpec::new("greeter", "sh -c 'echo hello; echo world'");
        spec.console = false;
        spec.log = Some(path.clone());
        let (mut program, capture) = program(spec);

        program.start();
        wait_until_stopped(&program).await;

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("Starting program (attempt 1)\n"));
        assert!(contents.contains("hello\nworld\n"));
        assert!(contents.contains("Program has stopped (exit code 0)\n"));
        assert!(!contents.contains("Starting log at"));

        // Program lines stay off the console, announcements do not
        let text = capture.text();
        assert!(!text.contains("hello"));
        assert!(text.contains("Starting program (attempt 1)"));
    }

    #[tokio::test]
    async fn test_log_file_append_writes_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("append.log");

        for _ in 0..2 {
            let mut spec = ProgramSpec::new("append", "sh -c 'echo line'");
            spec.console = false;
            spec.log = Some(path.clone());
            spec.log_append = true;
            let (mut program, _) = program(spec);

            program.start();
            wait_until_stopped(&program).await;
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("----- Starting log at").count(), 2);
        assert_eq!(contents.matches("line\n").count(), 2);
    }
}
