//! Console input parsing
//!
//! A line is either a command word or a visit written in dart notation:
//! `T20 T20 D16`, `S5 1 MISS`, `BULL`, `25`.

use shared::{Throw, MAX_DARTS_PER_VISIT};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputCommand {
    Visit(Vec<Throw>),
    Undo,
    Resync,
    Show,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("nothing entered")]
    Empty,
    #[error("'{0}' is not a dart (try T20, D16, 5, 25, BULL or MISS)")]
    UnknownDart(String),
    #[error("a visit has at most {max} darts, got {count}")]
    TooManyDarts { count: usize, max: usize },
}

pub const HELP: &str = "\
Enter a visit as up to three darts, e.g. `T20 T20 D16`, `5 1 MISS`, `BULL`.
Prefixes: S single, D double, T triple. 25 is the outer bull, BULL the bullseye.
Commands: undo, resync, show, help, quit";

pub fn parse_line(line: &str) -> Result<InputCommand, InputError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(InputError::Empty);
    }

    match line.to_ascii_lowercase().as_str() {
        "undo" | "u" => return Ok(InputCommand::Undo),
        "resync" | "sync" => return Ok(InputCommand::Resync),
        "show" | "score" | "s" => return Ok(InputCommand::Show),
        "help" | "?" => return Ok(InputCommand::Help),
        "quit" | "exit" | "q" => return Ok(InputCommand::Quit),
        _ => {}
    }

    let throws = line
        .split_whitespace()
        .map(parse_dart)
        .collect::<Result<Vec<_>, _>>()?;
    if throws.len() > MAX_DARTS_PER_VISIT {
        return Err(InputError::TooManyDarts {
            count: throws.len(),
            max: MAX_DARTS_PER_VISIT,
        });
    }
    Ok(InputCommand::Visit(throws))
}

/// Parses a single dart such as `T20`, `d16`, `7`, `25`, `BULL` or `MISS`
pub fn parse_dart(token: &str) -> Result<Throw, InputError> {
    let unknown = || InputError::UnknownDart(token.to_string());
    let upper = token.to_ascii_uppercase();

    match upper.as_str() {
        "MISS" | "M" | "0" => return Ok(Throw::miss()),
        "BULL" | "DB" | "50" => return Ok(Throw::bullseye()),
        "OB" | "SB" => return Ok(Throw::outer_bull()),
        _ => {}
    }

    let (multiplier, digits) = match upper.chars().next() {
        Some('S') => (1, &upper[1..]),
        Some('D') => (2, &upper[1..]),
        Some('T') => (3, &upper[1..]),
        _ => (1, upper.as_str()),
    };
    let segment: u8 = digits.parse().map_err(|_| unknown())?;

    let throw = Throw::new(segment, multiplier);
    if throw.is_miss() || !throw.is_valid() {
        return Err(unknown());
    }
    Ok(throw)
}
