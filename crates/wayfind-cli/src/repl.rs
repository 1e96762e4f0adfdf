//! REPL – Read-Eval-Print Loop for the wayfind interactive shell.
//!
//! Supported slash-commands:
//!   /remember <name> [--class <class>]  – remember where <name> is now
//!   /where <name>    – guide to the newest <name>
//!   /list            – every remembered object
//!   /history <name>  – every stored position of <name>
//!   /forget <name>   – forget the newest <name>
//!   /cancel          – stop the active guidance session
//!   /status          – tracking, map, GPS and session state
//!   /quit | /exit    – gracefully exit the CLI

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::runtime::Handle;
use wayfind_runtime::Assistant;
use wayfind_types::{NavError, SpatialObject};

/// One parsed REPL line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Remember { name: String, class: String },
    Where(String),
    List,
    History(String),
    Forget(String),
    Cancel,
    Status,
    Help,
    Quit,
}

/// Parse a slash-command. The error is the message to show the user.
pub fn parse(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (cmd, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let name = |usage: &str| {
        if rest.is_empty() {
            Err(format!("Usage: {usage}"))
        } else {
            Ok(rest.to_string())
        }
    };

    match cmd {
        "/remember" => {
            let (name, class) = match rest.split_once("--class") {
                Some((name, class)) => (name.trim(), class.trim()),
                None => (rest, ""),
            };
            if name.is_empty() {
                return Err("Usage: /remember <name> [--class <class>]".to_string());
            }
            let class = if class.is_empty() { name } else { class };
            Ok(Command::Remember {
                name: name.to_string(),
                class: class.to_lowercase(),
            })
        }
        "/where" => name("/where <name>").map(Command::Where),
        "/history" => name("/history <name>").map(Command::History),
        "/forget" => name("/forget <name>").map(Command::Forget),
        "/list" => Ok(Command::List),
        "/cancel" => Ok(Command::Cancel),
        "/status" => Ok(Command::Status),
        "/help" => Ok(Command::Help),
        "/quit" | "/exit" => Ok(Command::Quit),
        other => Err(format!(
            "{} '{}'. Type {} for available commands.",
            "Unknown command:".red(),
            other.yellow(),
            "/help".bold()
        )),
    }
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
/// Assistant calls run on `runtime`.
pub fn run(shutdown: Arc<AtomicBool>, runtime: Handle, assistant: Arc<Assistant>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "wayfind>".bold().cyan());
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
        if line.trim().is_empty() {
            continue;
        }

        match parse(&line) {
            Ok(Command::Quit) => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Ok(command) => execute(command, &runtime, &assistant),
            Err(message) => println!("{message}"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn execute(command: Command, runtime: &Handle, assistant: &Assistant) {
    match command {
        Command::Remember { name, class } => match runtime.block_on(assistant.remember(&name, &class)) {
            Ok(_) => {
                let stored = assistant.memory().find_latest(&name);
                println!("{} {}", "✓ Remembered".green(), name.bold());
                if let Ok(object) = stored {
                    print_object(&object);
                }
            }
            Err(e) => print_error(&e),
        },
        Command::Where(name) => match runtime.block_on(assistant.navigate_to(&name)) {
            Ok(mode) => println!("{} {} ({mode:?})", "✓ Navigating to".green(), name.bold()),
            Err(e) => print_error(&e),
        },
        Command::List => {
            let objects = assistant.list();
            if objects.is_empty() {
                println!("  {}", "Nothing remembered yet.".dimmed());
            }
            for object in objects.iter() {
                print_object(object);
            }
        }
        Command::History(name) => {
            let rows = assistant.memory().history(&name);
            if rows.is_empty() {
                print_error(&NavError::ObjectNotFound(name.trim().to_string()));
            }
            for object in &rows {
                print_object(object);
            }
        }
        Command::Forget(name) => match assistant.forget(&name) {
            Ok(object) => println!("{} {}", "✓ Forgot".green(), object.name.bold()),
            Err(e) => print_error(&e),
        },
        Command::Cancel => match assistant.cancel() {
            Ok(()) => println!("{}", "✓ Guidance will stop.".green()),
            Err(e) => print_error(&e),
        },
        Command::Status => cmd_status(assistant),
        Command::Help => cmd_help(),
        Command::Quit => {}
    }
}

fn cmd_help() {
    println!();
    println!("{}", "wayfind Commands".bold().underline());
    println!("  {}  – remember where <name> is now", "/remember <name> [--class <c>]".bold().cyan());
    println!("  {}                   – guide to <name>", "/where <name>".bold().cyan());
    println!("  {}                           – list remembered objects", "/list".bold().cyan());
    println!("  {}                 – every stored position of <name>", "/history <name>".bold().cyan());
    println!("  {}                  – forget the newest <name>", "/forget <name>".bold().cyan());
    println!("  {}                         – stop guidance", "/cancel".bold().cyan());
    println!("  {}                         – tracking and session state", "/status".bold().cyan());
    println!("  {}                    – exit the CLI", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_status(assistant: &Assistant) {
    let status = assistant.status();
    let fused = &status.fused;
    println!("{}", "Status".bold().underline());
    let tracking = if fused.tracking_lost {
        "lost".red()
    } else {
        "ok".green()
    };
    println!(
        "  Tracking   : {} (quality {:.2})",
        tracking, fused.tracking_quality
    );
    let p = fused.pose.position;
    println!("  Position   : ({:.2}, {:.2}, {:.2}) in map {}", p.x, p.y, p.z, status.active_map.to_string().bold());
    match fused.frame_transform {
        Some(t) => println!("  Anchored   : {} anchor(s), ±{:.1} m", t.anchor_count, t.accuracy_m()),
        None => println!("  Anchored   : {}", "no".yellow()),
    }
    match status.latest_fix {
        Some(fix) => println!(
            "  GPS        : {:.5}, {:.5} ±{:.1} m ({:?})",
            fix.latitude_deg, fix.longitude_deg, fix.horizontal_accuracy_m, fix.fix_quality
        ),
        None => println!("  GPS        : {}", "no fix".yellow()),
    }
    match status.session {
        Some(s) => println!(
            "  Session    : {} ({:?}, {} waypoint(s))",
            s.target.bold(),
            s.mode,
            s.waypoints
        ),
        None => println!("  Session    : {}", "idle".dimmed()),
    }
}

fn print_object(object: &SpatialObject) {
    let mut location = Vec::new();
    if let (Some(p), Some(map)) = (object.local_position, &object.map_id) {
        location.push(format!("({:.2}, {:.2}, {:.2}) in {}", p.x, p.y, p.z, map));
    }
    match (&object.address, object.geo_position) {
        (Some(address), _) => location.push(address.clone()),
        (None, Some(geo)) => location.push(format!("{:.5}, {:.5}", geo.latitude_deg, geo.longitude_deg)),
        (None, None) => {}
    }
    println!(
        "  • {} [{}] {} {}",
        object.name.bold(),
        object.class.dimmed(),
        location.join(" / "),
        object.created_at.format("%Y-%m-%d %H:%M").to_string().dimmed()
    );
}

fn print_error(e: &NavError) {
    let hint = match e {
        NavError::ObjectNotFound(_) => "Nothing by that name has been remembered.",
        NavError::InsufficientLocalization => "Move the device around a little and try again.",
        NavError::NoActiveSession => "Nothing is being guided right now.",
        NavError::MapMismatch { .. } => "That place was remembered in a different map.",
        NavError::RouteUnavailable(_) => "No route could be found.",
        _ => "",
    };
    println!("{}: {}", "Error".red(), e);
    if !hint.is_empty() {
        println!("  {}", hint.dimmed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remember_defaults_class_to_name() {
        assert_eq!(
            parse("/remember Car Keys").unwrap(),
            Command::Remember {
                name: "Car Keys".to_string(),
                class: "car keys".to_string()
            }
        );
    }

    #[test]
    fn remember_takes_explicit_class() {
        assert_eq!(
            parse("  /remember bike --class Bicycle ").unwrap(),
            Command::Remember {
                name: "bike".to_string(),
                class: "bicycle".to_string()
            }
        );
    }

    #[test]
    fn commands_needing_a_name_reject_empty() {
        for cmd in ["/remember", "/where", "/forget  ", "/history", "/remember --class keys"] {
            assert!(parse(cmd).is_err(), "{cmd}");
        }
    }

    #[test]
    fn plain_commands_parse() {
        assert_eq!(parse("/where my wallet").unwrap(), Command::Where("my wallet".to_string()));
        assert_eq!(parse("/list").unwrap(), Command::List);
        assert_eq!(parse("/cancel").unwrap(), Command::Cancel);
        assert_eq!(parse("/status").unwrap(), Command::Status);
        assert_eq!(parse("/exit").unwrap(), Command::Quit);
    }

    #[test]
    fn unknown_command_is_reported() {
        colored::control::set_override(false);
        let err = parse("/teleport home").unwrap_err();
        assert!(err.contains("/teleport"));
    }
}
