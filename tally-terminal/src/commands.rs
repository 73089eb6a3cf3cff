//! Line commands read from stdin.

use tally_core::{OperatingGroupId, StateId, ZoneId};

/// Condition used when `scan` is given no state.
const DEFAULT_STATE: StateId = StateId(1);

pub const USAGE: &str = "\
commands:
  start <zone> <group>     open a new inventory as host
  join <code>              join an inventory by invitation code
  scan <code> [state]      submit a scanned code (state defaults to 1)
  conditions               list item conditions
  status                   show scanned items and completion
  finish [observations]    close the inventory (refused while items are missing)
  finish! [observations]   close it anyway (also: finish --force)
  reset                    drop the local session
  help                     show this text
  quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start {
        zone: ZoneId,
        group: OperatingGroupId,
    },
    Join(String),
    Scan {
        code: String,
        state: StateId,
    },
    Conditions,
    Status,
    Finish {
        observations: String,
        /// Close even when items are missing.
        force: bool,
    },
    Reset,
    Help,
    Quit,
}

fn number(word: Option<&str>, what: &str) -> Result<i64, String> {
    let word = word.ok_or_else(|| format!("missing {what}"))?;
    word.parse()
        .map_err(|_| format!("{what} must be a number, got {word:?}"))
}

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "" => return Ok(None),
        "start" => {
            let mut words = rest.split_whitespace();
            Command::Start {
                zone: ZoneId(number(words.next(), "zone")?),
                group: OperatingGroupId(number(words.next(), "group")?),
            }
        }
        "join" if !rest.is_empty() => Command::Join(rest.to_string()),
        "join" => return Err("usage: join <code>".into()),
        "scan" if !rest.is_empty() => {
            // A trailing number is the condition; the code itself may contain spaces.
            match rest.rsplit_once(char::is_whitespace) {
                Some((code, state)) if state.parse::<i64>().is_ok() => Command::Scan {
                    code: code.trim().to_string(),
                    state: StateId(number(Some(state), "state")?),
                },
                _ => Command::Scan {
                    code: rest.to_string(),
                    state: DEFAULT_STATE,
                },
            }
        }
        "scan" => return Err("usage: scan <code> [state]".into()),
        "conditions" => Command::Conditions,
        "status" => Command::Status,
        "finish" => match rest.strip_prefix("--force") {
            Some(tail) if tail.is_empty() || tail.starts_with(char::is_whitespace) => {
                Command::Finish {
                    observations: tail.trim().to_string(),
                    force: true,
                }
            }
            _ => Command::Finish {
                observations: rest.to_string(),
                force: false,
            },
        },
        "finish!" => Command::Finish {
            observations: rest.to_string(),
            force: true,
        },
        "reset" => Command::Reset,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command {other:?}, try `help`")),
    };
    Ok(Some(command))
}
