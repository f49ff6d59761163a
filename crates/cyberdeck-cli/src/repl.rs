//! REPL – operator shell over the running daemon.
//!
//! Supported slash-commands:
//!   /help                          – show this list
//!   /systems                       – ids of every configured subsystem
//!   /status | /config | /configstatus
//!   /save                          – persist every live configuration
//!   /ping
//!   /invoke <id> <op> [args…]      – run one operation on one subsystem
//!   /heartbeat [on|off|probe]      – heartbeat state and control
//!   /quit | /exit                  – stop the daemon and exit
//!
//! `/invoke` arguments are parsed as JSON where possible (`42`, `true`,
//! `"two words"`), falling back to a bare string.

use colored::Colorize;
use serde_json::{Value, json};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cyberdeck_kernel::{Dispatcher, HeartbeatController};
use cyberdeck_types::Envelope;
use tokio::runtime::Handle;

/// A parsed command line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Systems,
    Status,
    Config,
    ConfigStatus,
    Save,
    Ping,
    Invoke {
        id: String,
        operation: String,
        args: Option<Vec<Value>>,
    },
    Heartbeat(HeartbeatAction),
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    Show,
    On,
    Off,
    Probe,
}

/// Parse one trimmed, non-empty input line.
pub fn parse(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let head = words.next().unwrap_or_default();
    let rest: Vec<&str> = words.collect();

    let bare = |cmd: Command| {
        if rest.is_empty() {
            Ok(cmd)
        } else {
            Err(format!("{head} takes no arguments"))
        }
    };

    match head {
        "/help" => bare(Command::Help),
        "/systems" => bare(Command::Systems),
        "/status" => bare(Command::Status),
        "/config" => bare(Command::Config),
        "/configstatus" => bare(Command::ConfigStatus),
        "/save" => bare(Command::Save),
        "/ping" => bare(Command::Ping),
        "/quit" | "/exit" => bare(Command::Quit),
        "/invoke" => match rest.as_slice() {
            [id, operation, args @ ..] => Ok(Command::Invoke {
                id: (*id).to_string(),
                operation: (*operation).to_string(),
                args: (!args.is_empty()).then(|| args.iter().map(|a| parse_arg(a)).collect()),
            }),
            _ => Err("usage: /invoke <id> <op> [args…]".to_string()),
        },
        "/heartbeat" => match rest.as_slice() {
            [] => Ok(Command::Heartbeat(HeartbeatAction::Show)),
            ["on"] => Ok(Command::Heartbeat(HeartbeatAction::On)),
            ["off"] => Ok(Command::Heartbeat(HeartbeatAction::Off)),
            ["probe"] => Ok(Command::Heartbeat(HeartbeatAction::Probe)),
            _ => Err("usage: /heartbeat [on|off|probe]".to_string()),
        },
        other => Err(format!("unknown command '{other}'")),
    }
}

fn parse_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Handles the daemon exposes to the shell.
pub struct Console {
    dispatcher: Arc<Dispatcher>,
    heartbeat: Option<Arc<HeartbeatController>>,
    runtime: Handle,
}

impl Console {
    pub fn new(dispatcher: Arc<Dispatcher>, heartbeat: Option<Arc<HeartbeatController>>, runtime: Handle) -> Self {
        Self {
            dispatcher,
            heartbeat,
            runtime,
        }
    }

    /// Execute a non-interactive command.  `Help` and `Quit` are handled by
    /// [`run`] and answer `None` here.
    ///
    /// Must not be called from inside the tokio runtime: `/heartbeat probe`
    /// blocks on it.
    pub fn execute(&self, command: &Command) -> Option<Envelope> {
        let d = &self.dispatcher;
        let envelope = match command {
            Command::Help | Command::Quit => return None,
            Command::Systems => d.systems(),
            Command::Status => d.status(),
            Command::Config => d.config(),
            Command::ConfigStatus => d.configstatus(),
            Command::Save => d.save_config(),
            Command::Ping => d.ping(),
            Command::Invoke { id, operation, args } => d.invoke(id, operation, args.clone()),
            Command::Heartbeat(action) => self.heartbeat(*action),
        };
        Some(envelope)
    }

    fn heartbeat(&self, action: HeartbeatAction) -> Envelope {
        let Some(hb) = &self.heartbeat else {
            return Envelope {
                success: false,
                response: json!("heartbeat is disabled in the daemon settings"),
            };
        };
        match action {
            HeartbeatAction::Show => {}
            HeartbeatAction::On => hb.enable(),
            HeartbeatAction::Off => hb.disable(),
            HeartbeatAction::Probe => {
                let present = self.runtime.block_on(hb.probe());
                return Envelope::ok(json!({ "present": present }));
            }
        }
        Envelope::ok(json!({
            "enabled": hb.is_enabled(),
            "param": format!("{:?}", hb.param()),
        }))
    }
}

/// Entry point for the interactive shell.
///
/// `shutdown` is polled each iteration; when set the shell exits cleanly.
pub fn run(console: &Console, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "cyberdeck>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse(line) {
            Ok(Command::Help) => cmd_help(),
            Ok(Command::Quit) => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Ok(command) => {
                if let Some(envelope) = console.execute(&command) {
                    print_envelope(&envelope);
                }
            }
            Err(e) => {
                println!("{} {}. Type {} for available commands.", "Error:".red(), e.yellow(), "/help".bold());
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_envelope(envelope: &Envelope) {
    let body = serde_json::to_string_pretty(&envelope.response).unwrap_or_else(|_| envelope.response.to_string());
    if envelope.success {
        println!("{} {}", "ok".green().bold(), body);
    } else {
        println!("{} {}", "failed".red().bold(), body.red());
    }
}

fn cmd_help() {
    println!();
    println!("{}", "Cyberdeck Commands".bold().underline());
    println!("  {}                      – list subsystem ids", "/systems".bold().cyan());
    println!("  {} – aggregate views", "/status  /config  /configstatus".bold().cyan());
    println!("  {}                         – write every configuration to disk", "/save".bold().cyan());
    println!("  {}                         – liveness check", "/ping".bold().cyan());
    println!("  {}   – run one operation", "/invoke <id> <op> [args…]".bold().cyan());
    println!("  {}   – heartbeat control", "/heartbeat [on|off|probe]".bold().cyan());
    println!("  {}                  – stop the daemon and exit", "/quit  /exit".bold().cyan());
    println!();
}
