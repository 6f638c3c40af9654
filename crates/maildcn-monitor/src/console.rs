//! Interactive commands read from stdin while monitoring

use maildcn_core::MonitorCommand;

/// Demonstration batches requested by `demo`
pub const DEMO_BATCHES: usize = 5;

/// Largest burst a single `demo` may ask for
pub const MAX_DEMO_BATCHES: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Monitor(MonitorCommand),
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  start | pause | resume | next | prev | reset   story playback
  select <node>                                 show a protocol node (again to close)
  speed <x>                                     simulation speed, 0.1 to 10
  details                                       toggle event payloads
  clear                                         drop all recorded events
  demo [n]                                      request demonstration traffic (n <= 100)
  status                                        print the current view
  quit";

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let arg = words.next();

    let command = match verb.to_ascii_lowercase().as_str() {
        "start" | "play" => ConsoleCommand::Monitor(MonitorCommand::Start),
        "pause" => ConsoleCommand::Monitor(MonitorCommand::Pause),
        "resume" => ConsoleCommand::Monitor(MonitorCommand::Resume),
        "p" | "toggle" => ConsoleCommand::Monitor(MonitorCommand::TogglePause),
        "next" | "n" => ConsoleCommand::Monitor(MonitorCommand::Next),
        "prev" | "previous" => ConsoleCommand::Monitor(MonitorCommand::Previous),
        "reset" => ConsoleCommand::Monitor(MonitorCommand::Reset),
        "hide" => ConsoleCommand::Monitor(MonitorCommand::HideExplanation),
        "select" => match arg {
            Some(id) => ConsoleCommand::Monitor(MonitorCommand::Select(id.to_ascii_lowercase())),
            None => ConsoleCommand::Monitor(MonitorCommand::ClearSelection),
        },
        "speed" => {
            let raw = arg.ok_or("usage: speed <x>")?;
            let speed: f64 = raw
                .trim_end_matches('x')
                .parse()
                .map_err(|_| format!("not a number: {}", raw))?;
            ConsoleCommand::Monitor(MonitorCommand::SetSpeed(speed))
        }
        "details" => ConsoleCommand::Monitor(MonitorCommand::ToggleDetails),
        "clear" => ConsoleCommand::Monitor(MonitorCommand::Clear),
        "demo" => {
            let count = match arg {
                Some(raw) => raw
                    .parse::<usize>()
                    .ok()
                    .filter(|n| (1..=MAX_DEMO_BATCHES).contains(n))
                    .ok_or_else(|| {
                        format!("demo count must be 1 to {}: {}", MAX_DEMO_BATCHES, raw)
                    })?,
                None => DEMO_BATCHES,
            };
            ConsoleCommand::Monitor(MonitorCommand::RequestDemo { count })
        }
        "status" | "s" => ConsoleCommand::Status,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" | "q" => ConsoleCommand::Quit,
        other => return Err(format!("unknown command '{}', try 'help'", other)),
    };

    Ok(Some(command))
}
