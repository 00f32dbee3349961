//! Line-oriented console: reads commands from stdin and drives a
//! `RemoteHandle`.  Stands in for a graphical front-end.

use std::str::FromStr;

use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use crate::core::{CoreBroadcast, RemoteHandle, RemoteSnapshot};
use crate::navigation::ModalId;

pub const HELP: &str = "\
commands:
  vol <0-100> | vol +N | vol -N     set or nudge volume
  source <plugin>                   activate an audio source
  multiroom on|off                  toggle multiroom output
  eq on|off                         toggle equalizer
  open snapcast|equalizer           open a modal
  push <screen> [json]              push a screen (json object merged into context)
  goto <screen> [json]              replace the stack above root with <screen>
  back | close
  set <group> <key> <json>          debounced settings edit
  flush                             send pending settings now
  state                             print the current snapshot
  quit";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    SetVolume(i32),
    AdjustVolume(i32),
    Source(String),
    Multiroom(bool),
    Equalizer(bool),
    Open(ModalId),
    Push(String, Map<String, Value>),
    GoTo(String, Map<String, Value>),
    Back,
    Close,
    Set {
        group: String,
        key: String,
        payload: Value,
    },
    Flush,
    State,
    Help,
    Quit,
}

fn on_off(arg: Option<&str>) -> anyhow::Result<bool> {
    match arg {
        Some("on") | Some("true") | Some("1") => Ok(true),
        Some("off") | Some("false") | Some("0") => Ok(false),
        other => anyhow::bail!("expected on|off, got {:?}", other),
    }
}

fn object_arg(rest: &str) -> anyhow::Result<Map<String, Value>> {
    let rest = rest.trim();
    if rest.is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str(rest)? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("expected a JSON object, got {}", other),
    }
}

/// Split off the first whitespace-delimited word.
fn word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], &s[i..]),
        None => (s, ""),
    }
}

pub fn parse(line: &str) -> anyhow::Result<Option<ConsoleCommand>> {
    let (cmd, rest) = word(line);
    let cmd = match cmd {
        "" => return Ok(None),
        "vol" | "volume" => {
            let arg = rest.trim();
            if arg.starts_with('+') || arg.starts_with('-') {
                ConsoleCommand::AdjustVolume(arg.parse()?)
            } else {
                ConsoleCommand::SetVolume(arg.parse()?)
            }
        }
        "source" | "src" => {
            let (plugin, _) = word(rest);
            if plugin.is_empty() {
                anyhow::bail!("source needs a plugin name");
            }
            ConsoleCommand::Source(plugin.to_string())
        }
        "multiroom" => ConsoleCommand::Multiroom(on_off(Some(rest.trim()))?),
        "eq" | "equalizer" => ConsoleCommand::Equalizer(on_off(Some(rest.trim()))?),
        "open" => ConsoleCommand::Open(ModalId::from_str(rest.trim())?),
        "push" | "goto" => {
            let (screen, json) = word(rest);
            if screen.is_empty() {
                anyhow::bail!("{} needs a screen id", cmd);
            }
            let extra = object_arg(json)?;
            if cmd == "push" {
                ConsoleCommand::Push(screen.to_string(), extra)
            } else {
                ConsoleCommand::GoTo(screen.to_string(), extra)
            }
        }
        "back" => ConsoleCommand::Back,
        "close" => ConsoleCommand::Close,
        "set" => {
            let (group, rest) = word(rest);
            let (key, json) = word(rest);
            if group.is_empty() || key.is_empty() {
                anyhow::bail!("set needs <group> <key> <json>");
            }
            ConsoleCommand::Set {
                group: group.to_string(),
                key: key.to_string(),
                payload: serde_json::from_str(json.trim())?,
            }
        }
        "flush" => ConsoleCommand::Flush,
        "state" | "s" => ConsoleCommand::State,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" | "q" => ConsoleCommand::Quit,
        other => anyhow::bail!("unknown command: {}", other),
    };
    Ok(Some(cmd))
}

pub fn describe(snapshot: &RemoteSnapshot) -> String {
    let s = &snapshot.system;
    let mut out = format!(
        "[rev {}] {} ({}) {}{}",
        snapshot.revision,
        s.source_label(),
        s.active_source_plugin.as_deref().unwrap_or("-"),
        if s.is_playing() { "playing" } else { "stopped" },
        if s.is_transitioning { " …switching" } else { "" },
    );
    if let Some(title) = s.track_title() {
        out.push_str(&format!(" | {}", title));
    }
    out.push_str(&format!(
        " | vol {}{}",
        snapshot.volume.current_volume,
        if snapshot.volume.pending_request { "*" } else { "" }
    ));
    if s.multiroom_enabled {
        out.push_str(&format!(" | multiroom {} up", s.connected_clients().count()));
    }
    if s.equalizer_enabled {
        out.push_str(" | eq");
    }
    if let Some(modal) = snapshot.modal.active_modal {
        out.push_str(&format!(
            " | modal {} {:?} ({})",
            modal,
            snapshot.modal.screen_stack,
            snapshot.modal_title.unwrap_or("")
        ));
    }
    if let Some(err) = &s.last_error {
        out.push_str(&format!(
            " | error @{}: {}",
            err.received_at.format("%H:%M:%S"),
            err.message
        ));
    }
    if !snapshot.connected {
        out.push_str(" | offline");
    }
    out
}

async fn execute(handle: &RemoteHandle, cmd: ConsoleCommand) -> anyhow::Result<bool> {
    match cmd {
        ConsoleCommand::SetVolume(v) => match handle.set_volume(v).await {
            Ok(v) => println!("volume {}", v),
            Err(e) => println!("volume: {}", e),
        },
        ConsoleCommand::AdjustVolume(d) => match handle.adjust_volume(d).await {
            Ok(v) => println!("volume {}", v),
            Err(e) => println!("volume: {}", e),
        },
        ConsoleCommand::Source(plugin) => handle.activate_source(plugin).await?,
        ConsoleCommand::Multiroom(on) => handle.set_multiroom(on).await?,
        ConsoleCommand::Equalizer(on) => handle.set_equalizer(on).await?,
        ConsoleCommand::Open(modal) => handle.open_modal(modal).await?,
        ConsoleCommand::Push(screen, extra) => handle.push_screen(screen, extra).await?,
        ConsoleCommand::GoTo(screen, extra) => handle.go_to_screen(screen, extra).await?,
        ConsoleCommand::Back => handle.go_back().await?,
        ConsoleCommand::Close => handle.close_modal().await?,
        ConsoleCommand::Set {
            group,
            key,
            payload,
        } => handle.schedule_setting(&group, &key, payload, None).await?,
        ConsoleCommand::Flush => handle.flush_settings().await?,
        ConsoleCommand::State => println!("{}", describe(&handle.snapshot().await?)),
        ConsoleCommand::Help => println!("{}", HELP),
        ConsoleCommand::Quit => return Ok(false),
    }
    Ok(true)
}

fn print_update(msg: &CoreBroadcast) {
    match msg {
        CoreBroadcast::VolumeUpdated {
            volume,
            show_bar: true,
        } => println!("volume {}", volume),
        CoreBroadcast::SettingsSaved { group, .. } => println!("saved {}", group),
        CoreBroadcast::SettingsFailed { group, message } => {
            println!("saving {} failed: {}", group, message)
        }
        CoreBroadcast::Connection(up) => {
            println!("{}", if *up { "connected" } else { "connection lost" })
        }
        _ => {}
    }
}

/// Read commands until EOF or `quit`.
pub async fn run(handle: RemoteHandle) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut updates = handle.updates();
    println!("{}", HELP);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse(&line) {
                    Ok(None) => {}
                    Ok(Some(cmd)) => {
                        if !execute(&handle, cmd).await? {
                            break;
                        }
                    }
                    Err(e) => println!("{}", e),
                }
            }
            msg = updates.recv() => match msg {
                Ok(msg) => print_update(&msg),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}
