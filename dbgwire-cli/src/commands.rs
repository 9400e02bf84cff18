// Console command parsing
//
// One command per line; each maps onto a single protocol request.

use dbgwire_client::{Address, Request};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(Request),
    Quit,
}

pub const HELP: &str = "commands: start | continue (c) | step (s) | break (b) <addr>... | \
clear <addr>... | list (ls) | quit (q)";

/// Parse one input line. Blank lines give `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let mut words = line.split_whitespace();
    let Some(name) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let command = match name {
        "start" => Command::Send(Request::start_execution()),
        "continue" | "c" => Command::Send(Request::continue_execution()),
        "step" | "s" => Command::Send(Request::step_one()),
        "list" | "ls" => Command::Send(Request::list_breakpoints()),
        "break" | "b" => Command::Send(Request::set_breakpoints(parse_addresses(name, &args)?)),
        "clear" => Command::Send(Request::remove_breakpoints(parse_addresses(name, &args)?)),
        "quit" | "q" | "close" => Command::Quit,
        _ => return Err(format!("Unknown command: {}", name)),
    };

    let takes_args = matches!(name, "break" | "b" | "clear");
    if !takes_args && !args.is_empty() {
        return Err(format!("{} takes no arguments", name));
    }

    Ok(Some(command))
}

fn parse_addresses(command: &str, args: &[&str]) -> Result<Vec<Address>, String> {
    if args.is_empty() {
        return Err(format!("{} needs at least one address", command));
    }

    args.iter().map(|arg| parse_address(arg)).collect()
}

/// Decimal or 0x-prefixed hex
fn parse_address(text: &str) -> Result<Address, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => Address::from_str_radix(hex, 16),
        None => text.parse(),
    };

    parsed.map_err(|e| format!("Invalid address {:?}: {}", text, e))
}
