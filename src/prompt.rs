//! Pre-reload confirmation
//!
//! A reload wipes the remote target, so the operator gets one chance to back
//! out. An empty line (just Enter) means go ahead; anything else, or end of
//! input, cancels.

use crossterm::style::Stylize;
use std::io::{self, BufRead, Write};

use crate::logger::TAG;

pub trait Confirmation: Send + Sync {
    fn confirm_reload(&self, remote_path: &str) -> bool;
}

/// Asks on the controlling terminal
pub struct StdinPrompt;

impl Confirmation for StdinPrompt {
    fn confirm_reload(&self, remote_path: &str) -> bool {
        let stdin = io::stdin();
        let mut input = stdin.lock();
        let mut output = io::stdout();
        ask(&mut input, &mut output, remote_path).unwrap_or(false)
    }
}

/// Skips the question (`--yes`)
pub struct AlwaysYes;

impl Confirmation for AlwaysYes {
    fn confirm_reload(&self, _remote_path: &str) -> bool {
        true
    }
}

pub fn ask<R: BufRead, W: Write>(input: &mut R, output: &mut W, remote_path: &str) -> io::Result<bool> {
    writeln!(
        output,
        "{} ~ {}",
        TAG.bold(),
        format!("EXIT NOW IF YOU DO NOT WANT TO RELOAD {remote_path}").bold()
    )?;
    write!(
        output,
        "{} ~ {}",
        TAG.bold(),
        "Press enter if you would like to continue.".bold()
    )?;
    output.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(false);
    }
    Ok(line.trim_end_matches(['\r', '\n']).is_empty())
}
