// Interactive console input for `serve` and `connect`

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use murmur_core::Presence;
use std::io::{IsTerminal, Write};
use tokio::sync::mpsc;
use zeroize::Zeroizing;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Plain text: broadcast it
    Say(String),
    Status(Option<Presence>),
    Who,
    Kick(String),
    Info,
    Help,
    Quit,
    Empty,
    Invalid(String),
}

pub fn parse(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    if !line.starts_with('/') {
        return Command::Say(line.to_string());
    }

    let mut parts = line.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::trim).unwrap_or_default();

    match command {
        "/quit" | "/exit" => Command::Quit,
        "/who" => Command::Who,
        "/info" => Command::Info,
        "/help" => Command::Help,
        "/kick" if !arg.is_empty() => Command::Kick(arg.to_string()),
        "/kick" => Command::Invalid("Usage: /kick <name>".to_string()),
        "/status" => match Presence::parse_optional(arg) {
            Ok(presence) => Command::Status(presence),
            Err(e) => Command::Invalid(format!("{} (try working, sleeping, eating or none)", e)),
        },
        other => Command::Invalid(format!("Unknown command: {}", other)),
    }
}

/// Read stdin lines on a plain thread so a pending read never holds up
/// runtime shutdown.
pub fn stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// What a key press does to a secret being typed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SecretKey {
    Continue,
    Done,
    Cancelled,
}

fn apply_secret_key(secret: &mut String, key: KeyEvent) -> SecretKey {
    if key.kind != KeyEventKind::Press {
        return SecretKey::Continue;
    }
    match key.code {
        KeyCode::Enter => SecretKey::Done,
        KeyCode::Esc => SecretKey::Cancelled,
        KeyCode::Char('c' | 'd') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            SecretKey::Cancelled
        }
        KeyCode::Backspace => {
            secret.pop();
            SecretKey::Continue
        }
        KeyCode::Char(c) => {
            secret.push(c);
            SecretKey::Continue
        }
        _ => SecretKey::Continue,
    }
}

/// Leaves raw mode however the read ends
struct RawMode;

impl RawMode {
    fn enable() -> std::io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Prompt for a secret. Keystrokes are not echoed when stdin is a
/// terminal; piped input is read as one line.
pub fn read_secret(prompt: &str) -> std::io::Result<Zeroizing<String>> {
    let mut stdout = std::io::stdout();
    write!(stdout, "{}", prompt)?;
    stdout.flush()?;

    let mut secret = Zeroizing::new(String::new());
    if !std::io::stdin().is_terminal() {
        std::io::stdin().read_line(&mut secret)?;
        let len = secret.trim_end_matches(['\r', '\n']).len();
        secret.truncate(len);
        return Ok(secret);
    }

    let outcome = {
        let _raw = RawMode::enable()?;
        loop {
            if let Event::Key(key) = event::read()? {
                match apply_secret_key(&mut secret, key) {
                    SecretKey::Continue => {}
                    done => break done,
                }
            }
        }
    };
    writeln!(stdout)?;

    match outcome {
        SecretKey::Cancelled => Err(std::io::Error::new(
            std::io::ErrorKind::Interrupted,
            "password entry cancelled",
        )),
        _ => Ok(secret),
    }
}
