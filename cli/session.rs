//! Interactive session over one loaded service.
//!
//! Every line is one command, split into words the way a shell would so a
//! quoted value may hold spaces. A failing command prints its error and the
//! session carries on; end of input or `quit` ends it.

use crate::commands::{self, CommandError, parse_exact_override, parse_matching_override};
use glycorisk::service::RiskService;
use glycorisk::shap::DEFAULT_TOP_K;
use rustyline::Editor;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use std::error::Error;
use std::io::{self, Write};

const PROMPT: &str = "> ";

const HELP: &str = "\
Commands:
  assess N                      show patient N with its risk probability and band
  what-if N COL=V [~TEXT=V]...  re-score patient N with edited fields
                                (~TEXT=V edits every column containing TEXT;
                                quote a value that holds spaces)
  explain N [K]                 top K feature contributions (default 10)
  fairness [COLUMN]             mean risk per group, or list eligible columns
  help                          show this message
  quit                          leave the session";

/// Whether the session keeps reading after a line.
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Reads commands from the terminal until end of input or `quit`.
pub fn run(service: &RiskService) -> Result<(), Box<dyn Error>> {
    let mut editor = Editor::<(), DefaultHistory>::new()?;
    println!("Loaded {} patients. Type 'help' for commands.", service.len());

    loop {
        match editor.readline(PROMPT) {
            Ok(line) => {
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    editor.add_history_entry(trimmed)?;
                }
                let mut stdout = io::stdout().lock();
                let flow = execute_line(service, &line, &mut stdout)?;
                stdout.flush()?;
                if flow == Flow::Quit {
                    break;
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Runs one session line, writing its output or error to `out`.
pub fn execute_line(service: &RiskService, line: &str, out: &mut impl Write) -> io::Result<Flow> {
    let words = match split_words(line) {
        Ok(words) => words,
        Err(message) => {
            writeln!(out, "Error: {message}")?;
            return Ok(Flow::Continue);
        }
    };
    let args: Vec<&str> = words.iter().map(String::as_str).collect();
    match args.first().copied() {
        None => {}
        Some("quit") | Some("exit") => return Ok(Flow::Quit),
        Some("help") => writeln!(out, "{HELP}")?,
        Some(command) => match dispatch(service, command, &args[1..], out) {
            Ok(()) => {}
            Err(CommandError::Io(e)) => return Err(e),
            Err(e) => writeln!(out, "Error: {e}")?,
        },
    }
    Ok(Flow::Continue)
}

/// Splits a line on whitespace, keeping single- or double-quoted runs whole.
fn split_words(line: &str) -> Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;

    for c in line.chars() {
        match quote {
            Some(open) if c == open => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_word = true;
            }
            None if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            None => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if let Some(open) = quote {
        return Err(format!("unterminated {open} quote"));
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

fn dispatch(
    service: &RiskService,
    command: &str,
    args: &[&str],
    out: &mut impl Write,
) -> Result<(), CommandError> {
    match command {
        "assess" => commands::assess(service, index_arg(args)?, out),
        "what-if" => {
            let index = index_arg(args)?;
            let overrides = args[1..]
                .iter()
                .map(|spec| match spec.strip_prefix('~') {
                    Some(rest) => parse_matching_override(rest),
                    None => parse_exact_override(spec),
                })
                .collect::<Result<Vec<_>, _>>()
                .map_err(CommandError::Usage)?;
            commands::what_if(service, index, &overrides, out)
        }
        "explain" => {
            let index = index_arg(args)?;
            let top_k = match args.get(1) {
                Some(raw) => raw
                    .parse()
                    .map_err(|_| CommandError::Usage(format!("'{raw}' is not a valid count")))?,
                None => DEFAULT_TOP_K,
            };
            commands::explain(service, index, top_k, out)
        }
        "fairness" => commands::fairness(service, args.first().copied(), out),
        other => Err(CommandError::Usage(format!(
            "unknown command '{other}'; type 'help' for the list"
        ))),
    }
}

fn index_arg(args: &[&str]) -> Result<usize, CommandError> {
    let raw = args
        .first()
        .ok_or_else(|| CommandError::Usage("a patient index is required".to_string()))?;
    raw.parse()
        .map_err(|_| CommandError::Usage(format!("'{raw}' is not a valid patient index")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_arg() {
        assert_eq!(index_arg(&["12"]).unwrap(), 12);
        assert!(matches!(index_arg(&[]), Err(CommandError::Usage(_))));
        assert!(matches!(index_arg(&["-1"]), Err(CommandError::Usage(_))));
    }

    #[test]
    fn test_split_words_keeps_quoted_runs() {
        assert_eq!(
            split_words("what-if 3  city=\"New York\" ~note='a b'").unwrap(),
            vec!["what-if", "3", "city=New York", "~note=a b"]
        );
        assert_eq!(split_words("   ").unwrap(), Vec::<String>::new());
        assert_eq!(split_words("fairness \"\"").unwrap(), vec!["fairness", ""]);
        assert!(split_words("what-if 1 city=\"Boston").is_err());
    }
}
