//! Sandboxed process execution for doc-tests.
//!
//! Every doc-test gets its own [`Sandbox`]: a unique scratch directory that
//! holds the generated source and the compiled binary. Processes started in a
//! sandbox:
//!
//! - run in their own process group, so the whole tree can be killed;
//! - have stdin closed and an environment reduced to `PATH` plus configured
//!   variables and the sandbox marker;
//! - may get address-space, CPU-time and file-size limits (Unix only);
//! - may run in private user, network and PID namespaces (Linux only). The
//!   namespace is torn down when the test program exits, so every process it
//!   started dies with it, including ones that called `setsid`;
//! - have stdout and stderr drained by reader threads, keeping at most
//!   `output_cap` bytes per stream.
//!
//! The wait loop polls in short `wait-timeout` slices so cancellation is
//! noticed promptly. After the process ends, its group is killed, and on
//! Linux any process still carrying the sandbox marker in its environment is
//! killed too. Output readers get a short grace period after that; a pipe
//! still held open past it is abandoned and the output marked truncated.
//! [`ProcessGroupGuard`] kills the group when dropped and the scratch
//! directory is removed when the sandbox is dropped, so every exit path
//! cleans up.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

use super::CancellationToken;

/// Granularity of the wait loop.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// How long output readers may run on after the process is gone.
const READER_GRACE: Duration = Duration::from_millis(500);

/// Environment variable holding the per-sandbox marker.
pub const MARKER_VAR: &str = "CPPDOC_SANDBOX_ID";

// ============================================================================
// Configuration
// ============================================================================

/// Network namespace isolation for test programs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkIsolation {
    /// Inherit the host network. Explicit opt-out only.
    Disabled,
    /// Try private namespaces; run unisolated if they are unavailable.
    BestEffort,
    /// Refuse to run without private namespaces.
    #[default]
    Required,
}

/// Kernel resource limits applied to a child before `exec`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    /// `RLIMIT_AS`, in bytes.
    pub address_space: Option<u64>,
    /// `RLIMIT_CPU`, in seconds.
    pub cpu_seconds: Option<u64>,
    /// `RLIMIT_FSIZE`, in bytes.
    pub file_size: Option<u64>,
}

impl ResourceLimits {
    /// No limits.
    pub fn none() -> Self {
        ResourceLimits::default()
    }

    #[cfg(unix)]
    fn apply(&self) -> io::Result<()> {
        // SAFETY: setrlimit only reads the struct we pass.
        unsafe {
            if let Some(bytes) = self.address_space {
                check(libc::setrlimit(libc::RLIMIT_AS, &rlimit(bytes)))?;
            }
            if let Some(secs) = self.cpu_seconds {
                check(libc::setrlimit(libc::RLIMIT_CPU, &rlimit(secs)))?;
            }
            if let Some(bytes) = self.file_size {
                check(libc::setrlimit(libc::RLIMIT_FSIZE, &rlimit(bytes)))?;
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
#[allow(clippy::unnecessary_cast)]
fn rlimit(value: u64) -> libc::rlimit {
    libc::rlimit {
        rlim_cur: value as libc::rlim_t,
        rlim_max: value as libc::rlim_t,
    }
}

#[cfg(unix)]
fn check(ret: libc::c_int) -> io::Result<()> {
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

// ============================================================================
// Namespaces
// ============================================================================

/// Namespace setup carried into the child. Everything that needs allocating
/// is prepared before `fork`.
#[cfg(unix)]
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
#[derive(Debug, Clone)]
struct Isolation {
    mode: NetworkIsolation,
    uid_map: Vec<u8>,
    gid_map: Vec<u8>,
}

#[cfg(unix)]
impl Isolation {
    fn new(mode: NetworkIsolation) -> Self {
        // SAFETY: getuid and getgid cannot fail.
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Isolation {
            mode,
            uid_map: format!("{uid} {uid} 1\n").into_bytes(),
            gid_map: format!("{gid} {gid} 1\n").into_bytes(),
        }
    }

    /// Runs in the forked child before `exec`.
    fn enter(&self) -> io::Result<()> {
        if self.mode == NetworkIsolation::Disabled {
            return Ok(());
        }
        #[cfg(target_os = "linux")]
        {
            // SAFETY: the child is single-threaded; unshare changes only its
            // own namespaces.
            let flags = libc::CLONE_NEWUSER | libc::CLONE_NEWNET | libc::CLONE_NEWPID;
            if let Err(e) = check(unsafe { libc::unshare(flags) }) {
                return match self.mode {
                    NetworkIsolation::Required => Err(e),
                    _ => Ok(()),
                };
            }
            write_proc(c"/proc/self/setgroups", b"deny")?;
            write_proc(c"/proc/self/uid_map", &self.uid_map)?;
            write_proc(c"/proc/self/gid_map", &self.gid_map)?;
            become_namespace_init()
        }
        #[cfg(not(target_os = "linux"))]
        {
            match self.mode {
                NetworkIsolation::Required => Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "network namespaces are not available on this platform",
                )),
                _ => Ok(()),
            }
        }
    }
}

/// Write `data` to a procfs file without allocating.
#[cfg(target_os = "linux")]
fn write_proc(path: &std::ffi::CStr, data: &[u8]) -> io::Result<()> {
    // SAFETY: path is NUL-terminated and data outlives the calls.
    unsafe {
        let fd = libc::open(path.as_ptr(), libc::O_WRONLY | libc::O_CLOEXEC);
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let written = libc::write(fd, data.as_ptr().cast(), data.len());
        let err = io::Error::last_os_error();
        libc::close(fd);
        if usize::try_from(written).ok() != Some(data.len()) {
            return Err(err);
        }
    }
    Ok(())
}

/// Fork twice so the test program runs under an init of our own inside the
/// new PID namespace.
///
/// The process that called `unshare` stays outside the namespace as the
/// process the caller sees. Its child is PID 1 of the namespace: it reaps
/// everything and reports the test program's wait status over a pipe before
/// exiting, which makes the kernel kill whatever is left in the namespace.
/// The grandchild returns and goes on to `exec`. The outer process then exits
/// the way the test program did.
#[cfg(target_os = "linux")]
fn become_namespace_init() -> io::Result<()> {
    // SAFETY: runs in a single-threaded child between fork and exec; only
    // async-signal-safe calls are made and the parent branches never return.
    unsafe {
        let mut fds: [libc::c_int; 2] = [0; 2];
        check(libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC))?;
        let [status_read, status_write] = fds;

        let init = libc::fork();
        if init < 0 {
            return Err(io::Error::last_os_error());
        }
        if init > 0 {
            close_inherited(status_read);
            let mut status: libc::c_int = 0;
            wait_for(init, &mut status);
            let mut reported: libc::c_int = 0;
            let size = std::mem::size_of::<libc::c_int>();
            let got = libc::read(status_read, (&mut reported as *mut libc::c_int).cast(), size);
            if usize::try_from(got).ok() != Some(size) {
                libc::_exit(127);
            }
            exit_like(reported);
        }

        libc::close(status_read);
        let program = libc::fork();
        if program < 0 {
            libc::_exit(127);
        }
        if program == 0 {
            libc::close(status_write);
            return Ok(());
        }

        close_inherited(status_write);
        let mut status: libc::c_int = 0;
        loop {
            let reaped = libc::waitpid(-1, &mut status, 0);
            if reaped == program {
                break;
            }
            if reaped < 0 && io::Error::last_os_error().raw_os_error() != Some(libc::EINTR) {
                libc::_exit(127);
            }
        }
        let size = std::mem::size_of::<libc::c_int>();
        libc::write(status_write, (&status as *const libc::c_int).cast(), size);
        libc::_exit(0)
    }
}

/// Close every descriptor above stderr except `keep`, releasing the pipes
/// the spawning process is waiting on.
#[cfg(target_os = "linux")]
unsafe fn close_inherited(keep: libc::c_int) {
    let keep = keep as libc::c_uint;
    for (first, last) in [(3, keep.saturating_sub(1)), (keep + 1, libc::c_uint::MAX)] {
        if first > last {
            continue;
        }
        let flags: libc::c_uint = 0;
        if libc::syscall(libc::SYS_close_range, first, last, flags) != 0 {
            for fd in first..last.min(1024) {
                libc::close(fd as libc::c_int);
            }
        }
    }
}

#[cfg(target_os = "linux")]
unsafe fn wait_for(pid: libc::pid_t, status: &mut libc::c_int) {
    while libc::waitpid(pid, status, 0) != pid {
        if io::Error::last_os_error().raw_os_error() != Some(libc::EINTR) {
            libc::_exit(127);
        }
    }
}

/// Exit with the code or signal recorded in a wait status.
#[cfg(target_os = "linux")]
unsafe fn exit_like(status: libc::c_int) -> ! {
    if libc::WIFEXITED(status) {
        libc::_exit(libc::WEXITSTATUS(status));
    }
    if libc::WIFSIGNALED(status) {
        let signal = libc::WTERMSIG(status);
        libc::signal(signal, libc::SIG_DFL);
        libc::kill(libc::getpid(), signal);
        libc::_exit(128 + signal);
    }
    libc::_exit(127)
}

// ============================================================================
// Sandbox Settings
// ============================================================================

/// Settings shared by every process in a sandbox.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Bytes kept per output stream.
    pub output_cap: usize,
    /// Variables added to the reduced environment.
    pub extra_env: BTreeMap<String, String>,
    /// Keep the scratch directory when the test fails.
    pub keep_on_failure: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        SandboxConfig {
            output_cap: 1024 * 1024,
            extra_env: BTreeMap::new(),
            keep_on_failure: false,
        }
    }
}

impl SandboxConfig {
    /// Enable keep_on_failure flag.
    pub fn keep_on_failure(mut self) -> Self {
        self.keep_on_failure = true;
        self
    }

    /// Set the per-stream capture cap.
    pub fn with_output_cap(mut self, cap: usize) -> Self {
        self.output_cap = cap;
        self
    }
}

/// One process to run inside a sandbox.
#[derive(Debug, Clone)]
pub struct ProcessSpec<'a> {
    /// Program and arguments.
    pub argv: &'a [String],
    /// Wall-clock limit.
    pub timeout: Duration,
    pub limits: ResourceLimits,
    pub network: NetworkIsolation,
}

impl<'a> ProcessSpec<'a> {
    /// A spec with no limits and no namespaces. Used for the compiler; test
    /// programs set their isolation with [`ProcessSpec::with_network`].
    pub fn new(argv: &'a [String], timeout: Duration) -> Self {
        ProcessSpec {
            argv,
            timeout,
            limits: ResourceLimits::none(),
            network: NetworkIsolation::Disabled,
        }
    }

    /// Set the resource limits.
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the network isolation mode.
    pub fn with_network(mut self, network: NetworkIsolation) -> Self {
        self.network = network;
        self
    }
}

// ============================================================================
// Process Outcome
// ============================================================================

/// How a sandboxed process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    /// Exited normally with a code.
    Exited(i32),
    /// Killed by a signal it did not ask for.
    Signaled(i32),
    /// Hit the wall-clock limit and was killed.
    TimedOut,
    /// The run was cancelled and the process killed.
    Cancelled,
}

impl ExitState {
    fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitState::Exited(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitState::Signaled(signal);
            }
        }
        ExitState::Exited(-1)
    }

    /// Exit code, when the process exited on its own.
    pub fn code(&self) -> Option<i32> {
        match self {
            ExitState::Exited(code) => Some(*code),
            _ => None,
        }
    }

    /// Exited with code 0.
    pub fn success(&self) -> bool {
        *self == ExitState::Exited(0)
    }
}

/// Result of running one process.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub state: ExitState,
    pub stdout: String,
    pub stderr: String,
    /// Some output was discarded because of the cap, or because a stray
    /// process kept a pipe open past the grace period.
    pub truncated: bool,
    pub duration: Duration,
}

// ============================================================================
// Process Group Guard
// ============================================================================

/// Owns a child that leads its own process group.
///
/// Dropping the guard sends SIGKILL to the whole group and reaps the child,
/// so grandchildren left behind by the test program die with it.
pub struct ProcessGroupGuard {
    child: Child,
    reaped: bool,
}

impl ProcessGroupGuard {
    /// Take ownership of a child spawned with `process_group(0)`.
    pub fn new(child: Child) -> Self {
        ProcessGroupGuard {
            child,
            reaped: false,
        }
    }

    /// Process group id (the child's pid).
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Kill every process in the group.
    pub fn kill_group(&mut self) {
        #[cfg(unix)]
        {
            // SAFETY: killpg has no memory effects; ESRCH is harmless.
            unsafe {
                libc::killpg(self.child.id() as libc::pid_t, libc::SIGKILL);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.kill();
        }
    }

    fn wait_slice(&mut self, slice: Duration) -> io::Result<Option<ExitStatus>> {
        let status = self.child.wait_timeout(slice)?;
        if status.is_some() {
            self.reaped = true;
        }
        Ok(status)
    }

    fn reap(&mut self) {
        if !self.reaped {
            let _ = self.child.wait();
            self.reaped = true;
        }
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill_group();
        self.reap();
    }
}

// ============================================================================
// Stray Processes
// ============================================================================

/// Passes over `/proc` before giving up on processes that keep forking.
#[cfg(target_os = "linux")]
const SWEEP_ROUNDS: usize = 8;

/// Kill every process whose environment carries `MARKER_VAR=marker`.
///
/// Catches descendants that left the process group. Processes of other
/// users and processes that already exited have unreadable environments and
/// are skipped. Returns the number of kills.
#[cfg(target_os = "linux")]
pub fn sweep_marked(marker: &str) -> usize {
    let entry = format!("{MARKER_VAR}={marker}");
    let mut killed = 0;
    for _ in 0..SWEEP_ROUNDS {
        let pids = marked_processes(entry.as_bytes());
        if pids.is_empty() {
            break;
        }
        for &pid in &pids {
            // SAFETY: kill and waitpid have no memory effects; waitpid only
            // reaps processes that are our own children.
            unsafe {
                libc::kill(pid, libc::SIGKILL);
                libc::waitpid(pid, std::ptr::null_mut(), libc::WNOHANG);
            }
        }
        killed += pids.len();
        thread::sleep(Duration::from_millis(10));
    }
    if killed > 0 {
        debug!("killed {} stray processes of sandbox {}", killed, marker);
    }
    killed
}

#[cfg(not(target_os = "linux"))]
pub fn sweep_marked(_marker: &str) -> usize {
    0
}

#[cfg(target_os = "linux")]
fn marked_processes(entry: &[u8]) -> Vec<libc::pid_t> {
    let Ok(dir) = fs::read_dir("/proc") else {
        return Vec::new();
    };
    let own = std::process::id();
    dir.filter_map(Result::ok)
        .filter_map(|e| e.file_name().to_str()?.parse::<u32>().ok())
        .filter(|&pid| pid != own)
        .filter(|pid| {
            fs::read(format!("/proc/{pid}/environ"))
                .is_ok_and(|env| env.split(|b| *b == 0).any(|var| var == entry))
        })
        .filter_map(|pid| libc::pid_t::try_from(pid).ok())
        .collect()
}

// ============================================================================
// Sandbox
// ============================================================================

/// A scratch directory for one doc-test.
pub struct Sandbox {
    /// Removed on drop unless persisted.
    dir: Option<TempDir>,
    path: PathBuf,
    /// Unique value of `MARKER_VAR` for processes of this sandbox.
    marker: String,
    config: SandboxConfig,
}

impl Sandbox {
    /// Create a fresh scratch directory.
    pub fn create(config: SandboxConfig) -> io::Result<Self> {
        let dir = TempDir::with_prefix("cppdoc_doctest_")?;
        let path = dir.path().to_path_buf();
        let marker = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        debug!("created sandbox {}", path.display());
        Ok(Sandbox {
            dir: Some(dir),
            path,
            marker,
            config,
        })
    }

    /// Scratch directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Value of `MARKER_VAR` given to processes of this sandbox.
    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Write `contents` to `name` inside the scratch directory.
    pub fn write_file(&self, name: &str, contents: &str) -> io::Result<PathBuf> {
        let path = self.path.join(name);
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// Run a process in the scratch directory and wait for it.
    ///
    /// Spawn failures (including a missing executable or unavailable required
    /// namespaces) are returned as errors. Timeouts and cancellation are
    /// outcomes, not errors.
    pub fn run(&self, spec: &ProcessSpec<'_>, token: &CancellationToken) -> io::Result<ProcessOutcome> {
        let (program, args) = spec
            .argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Empty command"))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&self.path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_clear();
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }
        cmd.env("CPPDOC_SANDBOX", "1");
        cmd.env(MARKER_VAR, &self.marker);
        for (key, value) in &self.config.extra_env {
            cmd.env(key, value);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
            let limits = spec.limits;
            let isolation = Isolation::new(spec.network);
            // SAFETY: the hook only makes async-signal-safe syscalls and
            // allocates nothing.
            unsafe {
                cmd.pre_exec(move || {
                    limits.apply()?;
                    isolation.enter()
                });
            }
        }

        #[cfg(not(unix))]
        if spec.network == NetworkIsolation::Required {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "network namespaces are not available on this platform",
            ));
        }

        let start = Instant::now();
        let mut child = cmd.spawn()?;
        let stdout = spawn_reader(child.stdout.take(), self.config.output_cap);
        let stderr = spawn_reader(child.stderr.take(), self.config.output_cap);
        let mut guard = ProcessGroupGuard::new(child);
        debug!("spawned {} as group {}", program, guard.id());

        let state = loop {
            if let Some(status) = guard.wait_slice(WAIT_SLICE)? {
                break ExitState::from_status(status);
            }
            if token.is_cancelled() {
                debug!("cancelling {}", program);
                break ExitState::Cancelled;
            }
            if start.elapsed() >= spec.timeout {
                warn!("{} timed out after {:?}", program, spec.timeout);
                break ExitState::TimedOut;
            }
        };

        // Kill leftovers so the readers see EOF, then collect output.
        guard.kill_group();
        guard.reap();
        sweep_marked(&self.marker);
        let deadline = Instant::now() + READER_GRACE;
        let (stdout, out_truncated) = stdout.finish(deadline);
        let (stderr, err_truncated) = stderr.finish(deadline);

        Ok(ProcessOutcome {
            state,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            truncated: out_truncated || err_truncated,
            duration: start.elapsed(),
        })
    }

    /// Mark this sandbox to be preserved (not cleaned up on drop).
    pub fn persist(&mut self) -> PathBuf {
        if let Some(dir) = self.dir.take() {
            self.path = dir.keep();
        }
        self.path.clone()
    }

    /// Explicitly dispose the sandbox.
    ///
    /// If keep_on_failure is configured and the test failed, the directory is
    /// preserved and its path returned.
    pub fn dispose(mut self, failed: bool) -> Option<PathBuf> {
        if failed && self.config.keep_on_failure {
            Some(self.persist())
        } else {
            None
        }
    }
}

// ============================================================================
// Output Readers
// ============================================================================

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

/// A stream drained on its own thread.
///
/// The thread is detached; if a stray process keeps the pipe open it ends
/// when that process dies.
struct Reader {
    captured: Arc<Mutex<Captured>>,
    done: Option<Receiver<()>>,
}

impl Reader {
    /// Wait for EOF until `deadline`, then take what was captured.
    fn finish(self, deadline: Instant) -> (Vec<u8>, bool) {
        let complete = match &self.done {
            Some(done) => done
                .recv_timeout(deadline.saturating_duration_since(Instant::now()))
                .is_ok(),
            None => true,
        };
        if !complete {
            warn!("output pipe still open after the process ended; output truncated");
        }
        let mut captured = self
            .captured
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let bytes = std::mem::take(&mut captured.bytes);
        (bytes, captured.truncated || !complete)
    }
}

/// Drain `stream` on a thread, keeping at most `cap` bytes.
///
/// Reading continues past the cap so the child never blocks on a full pipe.
fn spawn_reader<R: Read + Send + 'static>(stream: Option<R>, cap: usize) -> Reader {
    let captured = Arc::new(Mutex::new(Captured::default()));
    let Some(mut stream) = stream else {
        return Reader {
            captured,
            done: None,
        };
    };

    let (tx, rx) = mpsc::channel();
    let sink = Arc::clone(&captured);
    thread::spawn(move || {
        let mut chunk = [0u8; 8192];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    let mut captured = sink.lock().unwrap_or_else(|p| p.into_inner());
                    let room = cap.saturating_sub(captured.bytes.len());
                    if n > room {
                        captured.truncated = true;
                    }
                    captured.bytes.extend_from_slice(&chunk[..n.min(room)]);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        let _ = tx.send(());
    });
    Reader {
        captured,
        done: Some(rx),
    }
}

// ============================================================================
// Tests
// ============================================================================
