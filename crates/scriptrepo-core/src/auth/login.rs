//! Interactive login step.
//!
//! The login UI runs out of process. When the user finishes it prints one
//! line of the form `SaveLogin:<true|false>,Cookies:<name:value;...>` and
//! everything else it writes is diagnostic noise.

use std::path::PathBuf;
use std::process::Stdio;

use futures::future::BoxFuture;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::AuthenticationError;

/// Buffered output lines between the reader tasks and the scanner.
const LINE_BUFFER: usize = 64;

const SAVE_LOGIN_PREFIX: &str = "SaveLogin:";
const COOKIES_MARKER: &str = ",Cookies:";

/// Result of a completed interactive login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    /// Raw `name:value;...` cookie string.
    pub cookies: String,
    /// The user asked for the login to be remembered on this machine.
    pub remember: bool,
}

/// Something that can walk the user through logging in.
pub trait LoginProvider: Send + Sync {
    fn login(&self) -> BoxFuture<'_, Result<LoginOutcome, AuthenticationError>>;
}

/// Runs an external login program and scrapes its output for the result.
#[derive(Debug, Clone)]
pub struct CommandLogin {
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandLogin {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
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

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    async fn run(&self) -> Result<LoginOutcome, AuthenticationError> {
        info!(program = %self.program.display(), "Starting interactive login");

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = self.working_dir {
            command.current_dir(dir);
        }
        let mut child = command.spawn().map_err(AuthenticationError::Spawn)?;

        // Merge stdout and stderr into one stream of lines
        let (tx, mut rx) = mpsc::channel::<String>(LINE_BUFFER);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx.clone()));
        }
        drop(tx);

        let mut outcome = None;
        while let Some(line) = rx.recv().await {
            debug!(line = %line, "Output from login process");
            if let Some(parsed) = parse_login_line(&line) {
                outcome = Some(parsed);
                break;
            }
        }

        if let Err(e) = child.kill().await {
            debug!(error = %e, "Login process already gone");
        }

        outcome.ok_or(AuthenticationError::NoResult)
    }
}

impl LoginProvider for CommandLogin {
    fn login(&self) -> BoxFuture<'_, Result<LoginOutcome, AuthenticationError>> {
        Box::pin(self.run())
    }
}

async fn forward_lines<R: AsyncRead + Unpin>(reader: R, tx: mpsc::Sender<String>) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).await.is_err() {
            break;
        }
    }
}

/// Parse a `SaveLogin:<bool>,Cookies:<cookies>` line.
pub fn parse_login_line(line: &str) -> Option<LoginOutcome> {
    let rest = line.trim().strip_prefix(SAVE_LOGIN_PREFIX)?;
    let (flag, cookies) = rest.split_once(COOKIES_MARKER)?;
    let remember = match flag {
        "true" => true,
        "false" => false,
        _ => return None,
    };
    Some(LoginOutcome {
        cookies: cookies.to_string(),
        remember,
    })
}
