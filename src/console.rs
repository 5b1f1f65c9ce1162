use std::io::{BufRead, BufReader};
use std::thread;

use tokio::sync::mpsc::UnboundedSender;

use dance_sync::{Control, Intent, SharedStatus};

/// A parsed console line.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Control(Control),
    Status,
}

/// Parse one console line; `None` for blank or unknown input.
pub fn parse_line(line: &str) -> Option<ConsoleCommand> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((w, r)) => (w, r.trim()),
        None => (line, ""),
    };

    let control = match (word.to_ascii_lowercase().as_str(), rest) {
        ("", _) => return None,
        ("play", "") => Control::Intent(Intent::play()),
        ("play", key) => Control::Intent(Intent::play_by_key(key)),
        ("stop", _) => Control::Intent(Intent::stop()),
        ("next", _) => Control::Intent(Intent::next()),
        ("prev", _) => Control::Intent(Intent::prev()),
        ("broadcast", "on") => Control::SetBroadcastEnabled(true),
        ("broadcast", "off") => Control::SetBroadcastEnabled(false),
        ("enable", _) => Control::SetEnabled(true),
        ("disable", _) => Control::SetEnabled(false),
        ("quit", _) | ("exit", _) => Control::Shutdown,
        ("status", _) => return Some(ConsoleCommand::Status),
        _ => return None,
    };
    Some(ConsoleCommand::Control(control))
}

/// Read commands from stdin on a background thread and forward them to the node.
pub fn spawn(controls: UnboundedSender<Control>, status: SharedStatus) {
    thread::spawn(move || {
        let reader = BufReader::new(std::io::stdin());

        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    log::error!("Error reading console input: {}", e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            match parse_line(&line) {
                Some(ConsoleCommand::Status) => {
                    let snapshot = status.read().clone();
                    log::info!("Status: {:?}", snapshot);
                }
                Some(ConsoleCommand::Control(control)) => {
                    let quit = control == Control::Shutdown;
                    if controls.send(control).is_err() {
                        log::warn!("Sync node is gone, ignoring {:?}", line);
                        break;
                    }
                    if quit {
                        break;
                    }
                }
                None => log::warn!("Unknown command: {:?}", line),
            }
        }

        log::debug!("Console reader stopped");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_transport_words() {
        assert_eq!(
            parse_line("play SongA"),
            Some(ConsoleCommand::Control(Control::Intent(Intent::play_by_key("SongA"))))
        );
        assert_eq!(
            parse_line("  NEXT "),
            Some(ConsoleCommand::Control(Control::Intent(Intent::next())))
        );
        assert_eq!(
            parse_line("broadcast off"),
            Some(ConsoleCommand::Control(Control::SetBroadcastEnabled(false)))
        );
        assert_eq!(parse_line("status"), Some(ConsoleCommand::Status));
    }

    #[test]
    fn ignores_blank_and_unknown() {
        assert_eq!(parse_line("   "), None);
        assert_eq!(parse_line("dance harder"), None);
    }
}
