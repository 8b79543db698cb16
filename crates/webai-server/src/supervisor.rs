//! Process supervisor: runs exactly one of two API servers on the same
//! address and switches between them on operator command.
//!
//! `WebAi` is this binary's own `serve` subcommand; `Fallback` is an external
//! command taken from `[Server] fallback_command`. A switch stops the active
//! child, spawns the other and only reports it running once it answers on
//! its readiness path.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};
use webai_chat::CredentialResolver;
use webai_core::Settings;

const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);
const CHILD_CHECK_INTERVAL: Duration = Duration::from_secs(2);
const STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    WebAi,
    Fallback,
}

impl Mode {
    pub fn other(self) -> Self {
        match self {
            Self::WebAi => Self::Fallback,
            Self::Fallback => Self::WebAi,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::WebAi => "WebAI",
            Self::Fallback => "fallback",
        }
    }

    /// Path polled to decide the server is up.
    pub fn readiness_path(self) -> &'static str {
        match self {
            Self::WebAi => "/health",
            Self::Fallback => "/v1/models",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Starting(Mode),
    Running(Mode),
    Switching { from: Mode, to: Mode },
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Operator (or startup) asks for a mode.
    Launch(Mode),
    /// The pending child answered its readiness check.
    Ready,
    /// The pending child failed to spawn or never became ready, or the
    /// running child exited.
    Failed,
    Quit,
}

impl SupervisorState {
    pub fn on(self, event: Event) -> Self {
        use SupervisorState::*;
        match (self, event) {
            (Stopped, _) => Stopped,
            (_, Event::Quit) => Stopped,
            (Idle, Event::Launch(mode)) => Starting(mode),
            (Running(from), Event::Launch(to)) if from != to => Switching { from, to },
            (Starting(mode), Event::Ready) | (Switching { to: mode, .. }, Event::Ready) => {
                Running(mode)
            }
            (Starting(_), Event::Failed)
            | (Switching { .. }, Event::Failed)
            | (Running(_), Event::Failed) => Idle,
            (state, _) => state,
        }
    }

    /// Mode of the child that is up and answering.
    pub fn running(self) -> Option<Mode> {
        match self {
            Self::Running(mode) => Some(mode),
            _ => None,
        }
    }
}

/// Operator commands, one per stdin line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    Switch(Mode),
    Toggle,
    Quit,
}

pub fn parse_command(line: &str) -> Option<OperatorCommand> {
    match line.trim().to_lowercase().as_str() {
        "1" | "w" => Some(OperatorCommand::Switch(Mode::WebAi)),
        "2" | "g" => Some(OperatorCommand::Switch(Mode::Fallback)),
        "s" => Some(OperatorCommand::Toggle),
        "q" => Some(OperatorCommand::Quit),
        _ => None,
    }
}

/// `WebAi` when credentials for the default provider resolve, else `Fallback`.
pub fn initial_mode(settings: &Settings, resolver: &CredentialResolver) -> Mode {
    let provider = match settings.default_provider() {
        Ok(p) => p,
        Err(e) => {
            warn!("{}; starting the fallback server", e);
            return Mode::Fallback;
        }
    };
    match resolver.resolve(provider) {
        Ok(creds) => {
            info!("Found {} credentials ({:?})", provider, creds.source);
            Mode::WebAi
        }
        Err(e) => {
            warn!("{}; starting the fallback server", e);
            Mode::Fallback
        }
    }
}

/// Split `fallback_command` into argv with `{host}`/`{port}` filled in.
pub fn fallback_argv(template: &str, host: &str, port: u16) -> Vec<String> {
    template
        .split_whitespace()
        .map(|arg| {
            arg.replace("{host}", host)
                .replace("{port}", &port.to_string())
        })
        .collect()
}

/// How a launch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launch {
    /// Running, or failed and back to idle.
    Settled,
    /// Interrupted while waiting for readiness; the child was stopped.
    Interrupted,
}

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub host: String,
    pub port: u16,
    pub config_path: PathBuf,
    pub fallback_command: String,
    /// Executable spawned for `WebAi` mode with the `serve` subcommand.
    pub exe: PathBuf,
    pub readiness_timeout: Duration,
}

pub struct Supervisor {
    opts: SupervisorOptions,
    state: SupervisorState,
    child: Option<Child>,
    last_mode: Mode,
    http: reqwest::Client,
}

impl Supervisor {
    pub fn new(opts: SupervisorOptions) -> Self {
        Self {
            opts,
            state: SupervisorState::Idle,
            child: None,
            last_mode: Mode::WebAi,
            http: reqwest::Client::new(),
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    fn set_state(&mut self, event: Event) {
        let next = self.state.on(event);
        debug!("Supervisor {:?} --{:?}--> {:?}", self.state, event, next);
        self.state = next;
    }

    /// Start `initial` and serve operator commands until `q` or Ctrl-C.
    pub async fn run(mut self, initial: Mode) -> anyhow::Result<()> {
        if self.launch(initial).await == Launch::Interrupted {
            return self.shutdown().await;
        }
        print_help();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;
        let mut child_check = tokio::time::interval(CHILD_CHECK_INTERVAL);

        loop {
            tokio::select! {
                line = lines.next_line(), if stdin_open => match line {
                    Ok(Some(line)) => match parse_command(&line) {
                        Some(OperatorCommand::Quit) => break,
                        Some(OperatorCommand::Switch(mode)) => {
                            if self.launch(mode).await == Launch::Interrupted {
                                break;
                            }
                        }
                        Some(OperatorCommand::Toggle) => {
                            let target = self.state.running().unwrap_or(self.last_mode).other();
                            if self.launch(target).await == Launch::Interrupted {
                                break;
                            }
                        }
                        None if line.trim().is_empty() => {}
                        None => {
                            warn!("Unknown command '{}'", line.trim());
                            print_help();
                        }
                    },
                    Ok(None) => {
                        debug!("stdin closed; Ctrl-C to stop");
                        stdin_open = false;
                    }
                    Err(e) => {
                        warn!("stdin read failed: {}", e);
                        stdin_open = false;
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                    break;
                }
                _ = child_check.tick() => self.check_child(),
            }
        }

        self.shutdown().await
    }

    async fn shutdown(mut self) -> anyhow::Result<()> {
        self.stop_child().await;
        self.set_state(Event::Quit);
        info!("Supervisor stopped");
        Ok(())
    }

    /// Bring up `target`, replacing whatever is running. Ctrl-C during the
    /// readiness wait abandons the launch.
    pub async fn launch(&mut self, target: Mode) -> Launch {
        self.launch_until(target, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }

    /// [`Supervisor::launch`] with the readiness wait raced against `interrupt`.
    pub async fn launch_until<F>(&mut self, target: Mode, interrupt: F) -> Launch
    where
        F: std::future::Future<Output = ()>,
    {
        if self.state.running() == Some(target) {
            info!("{} server is already running", target);
            return Launch::Settled;
        }
        self.set_state(Event::Launch(target));
        self.last_mode = target;
        self.stop_child().await;

        let child = match self.spawn(target) {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to start {} server: {:#}", target, e);
                self.set_state(Event::Failed);
                return Launch::Settled;
            }
        };
        self.child = Some(child);

        let ready = tokio::select! {
            ready = self.wait_ready(target) => Some(ready),
            _ = interrupt => None,
        };
        match ready {
            Some(true) => {
                self.set_state(Event::Ready);
                info!(
                    "{} server running at http://{}:{}",
                    target, self.opts.host, self.opts.port
                );
                Launch::Settled
            }
            Some(false) => {
                error!(
                    "{} server did not become ready within {:?}",
                    target, self.opts.readiness_timeout
                );
                self.stop_child().await;
                self.set_state(Event::Failed);
                Launch::Settled
            }
            None => {
                info!("Interrupted while starting the {} server", target);
                self.stop_child().await;
                self.set_state(Event::Failed);
                Launch::Interrupted
            }
        }
    }

    fn command(&self, mode: Mode) -> anyhow::Result<Command> {
        let mut cmd = match mode {
            Mode::WebAi => {
                let mut cmd = Command::new(&self.opts.exe);
                cmd.arg("serve")
                    .arg("--host")
                    .arg(&self.opts.host)
                    .arg("--port")
                    .arg(self.opts.port.to_string())
                    .arg("--config")
                    .arg(&self.opts.config_path);
                cmd
            }
            Mode::Fallback => {
                let argv = fallback_argv(&self.opts.fallback_command, &self.opts.host, self.opts.port);
                let (program, args) = argv
                    .split_first()
                    .ok_or_else(|| anyhow!("[Server] fallback_command is empty"))?;
                let mut cmd = Command::new(program);
                cmd.args(args);
                cmd
            }
        };
        cmd.stdin(Stdio::null()).kill_on_drop(true);

        // Linux: the kernel sends SIGTERM to the child if the supervisor dies.
        #[cfg(target_os = "linux")]
        unsafe {
            cmd.pre_exec(|| {
                libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM);
                Ok(())
            });
        }
        Ok(cmd)
    }

    fn spawn(&self, mode: Mode) -> anyhow::Result<Child> {
        let child = self
            .command(mode)?
            .spawn()
            .with_context(|| format!("spawning {} server", mode))?;
        debug!("Spawned {} server (pid {:?})", mode, child.id());
        Ok(child)
    }

    /// Poll the readiness path until it answers 2xx, the child exits or the
    /// timeout elapses.
    async fn wait_ready(&mut self, mode: Mode) -> bool {
        let url = format!(
            "http://{}:{}{}",
            self.opts.host,
            self.opts.port,
            mode.readiness_path()
        );
        let deadline = Instant::now() + self.opts.readiness_timeout;

        while Instant::now() < deadline {
            if let Some(child) = self.child.as_mut() {
                if let Ok(Some(status)) = child.try_wait() {
                    warn!("{} server exited during startup ({})", mode, status);
                    self.child = None;
                    return false;
                }
            }
            match self.http.get(&url).timeout(READY_POLL_INTERVAL).send().await {
                Ok(resp) if resp.status().is_success() => return true,
                Ok(resp) => debug!("{} answered {}", url, resp.status()),
                Err(_) => {}
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
        false
    }

    /// Report a running child that exited on its own.
    fn check_child(&mut self) {
        let Some(child) = self.child.as_mut() else {
            return;
        };
        if let Ok(Some(status)) = child.try_wait() {
            error!("{} server exited ({}); enter a command to restart", self.last_mode, status);
            self.child = None;
            self.set_state(Event::Failed);
        }
    }

    async fn stop_child(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Err(e) = child.start_kill() {
            debug!("kill: {}", e);
        }
        match tokio::time::timeout(STOP_GRACE, child.wait()).await {
            Ok(Ok(status)) => debug!("Child stopped ({})", status),
            Ok(Err(e)) => warn!("Waiting for child failed: {}", e),
            Err(_) => warn!("Child did not exit within {:?}", STOP_GRACE),
        }
    }
}

fn print_help() {
    println!("Commands: [1|w] WebAI server  [2|g] fallback server  [s] switch  [q] quit");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use webai_browser::StaticCookieSource;
    use webai_core::ConfigStore;

    #[test]
    fn test_startup_and_switch_transitions() {
        let s = SupervisorState::Idle.on(Event::Launch(Mode::WebAi));
        assert_eq!(s, SupervisorState::Starting(Mode::WebAi));
        let s = s.on(Event::Ready);
        assert_eq!(s.running(), Some(Mode::WebAi));

        let s = s.on(Event::Launch(Mode::Fallback));
        assert_eq!(
            s,
            SupervisorState::Switching {
                from: Mode::WebAi,
                to: Mode::Fallback
            }
        );
        assert_eq!(s.running(), None);
        assert_eq!(s.on(Event::Ready), SupervisorState::Running(Mode::Fallback));
    }

    #[test]
    fn test_failed_start_returns_to_idle() {
        let s = SupervisorState::Running(Mode::WebAi)
            .on(Event::Launch(Mode::Fallback))
            .on(Event::Failed);
        assert_eq!(s, SupervisorState::Idle);
        assert_eq!(
            s.on(Event::Launch(Mode::WebAi)),
            SupervisorState::Starting(Mode::WebAi)
        );
    }

    #[test]
    fn test_relaunching_running_mode_is_noop() {
        let s = SupervisorState::Running(Mode::Fallback);
        assert_eq!(s.on(Event::Launch(Mode::Fallback)), s);
    }

    #[test]
    fn test_stopped_is_terminal() {
        for s in [
            SupervisorState::Idle,
            SupervisorState::Starting(Mode::WebAi),
            SupervisorState::Running(Mode::Fallback),
        ] {
            let stopped = s.on(Event::Quit);
            assert_eq!(stopped, SupervisorState::Stopped);
            assert_eq!(stopped.on(Event::Launch(Mode::WebAi)), SupervisorState::Stopped);
        }
    }

    #[test]
    fn test_parse_operator_commands() {
        assert_eq!(parse_command("1"), Some(OperatorCommand::Switch(Mode::WebAi)));
        assert_eq!(parse_command(" W \n"), Some(OperatorCommand::Switch(Mode::WebAi)));
        assert_eq!(parse_command("2"), Some(OperatorCommand::Switch(Mode::Fallback)));
        assert_eq!(parse_command("g"), Some(OperatorCommand::Switch(Mode::Fallback)));
        assert_eq!(parse_command("s"), Some(OperatorCommand::Toggle));
        assert_eq!(parse_command("q"), Some(OperatorCommand::Quit));
        assert_eq!(parse_command("restart"), None);
    }

    #[test]
    fn test_fallback_argv_substitution() {
        assert_eq!(
            fallback_argv("g4f api --bind {host}:{port}", "localhost", 6969),
            vec!["g4f", "api", "--bind", "localhost:6969"]
        );
        assert!(fallback_argv("   ", "h", 1).is_empty());
    }

    #[test]
    fn test_initial_mode_follows_credentials() {
        let config = Arc::new(ConfigStore::from_ini_str("").unwrap());
        let settings = config.settings();

        let empty = CredentialResolver::new(config.clone(), Arc::new(StaticCookieSource::new()));
        assert_eq!(initial_mode(&settings, &empty), Mode::Fallback);

        let cookies = StaticCookieSource::new()
            .with_cookie(".google.com", "__Secure-1PSID", "a")
            .with_cookie(".google.com", "__Secure-1PSIDTS", "b");
        let found = CredentialResolver::new(config, Arc::new(cookies));
        assert_eq!(initial_mode(&settings, &found), Mode::WebAi);
    }

    fn supervisor(fallback_command: &str, readiness_timeout: Duration) -> Supervisor {
        Supervisor::new(SupervisorOptions {
            host: "127.0.0.1".into(),
            port: 1,
            config_path: PathBuf::from("config.conf"),
            fallback_command: fallback_command.into(),
            exe: PathBuf::from("webai"),
            readiness_timeout,
        })
    }

    #[tokio::test]
    async fn test_empty_fallback_command_fails_launch() {
        let mut supervisor = supervisor(" ", Duration::from_millis(100));
        assert_eq!(supervisor.launch(Mode::Fallback).await, Launch::Settled);
        assert_eq!(supervisor.state(), SupervisorState::Idle);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_interrupt_cuts_readiness_wait_short() {
        let mut supervisor = supervisor("sleep 60", Duration::from_secs(30));
        let started = Instant::now();
        let outcome = supervisor
            .launch_until(Mode::Fallback, tokio::time::sleep(Duration::from_millis(200)))
            .await;

        assert_eq!(outcome, Launch::Interrupted);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(supervisor.state(), SupervisorState::Idle);
        assert!(supervisor.child.is_none());
    }
}
