use std::{
    io::{BufRead, BufReader, Read},
    process::{Child, Command, Stdio},
    sync::{mpsc::Sender, OnceLock},
    thread,
};

use regex_lite::Regex;
use tracing::{debug, warn};

use crate::{
    app::AudioEvent,
    errors::{AppResult, VolwatchError},
};

use super::{AudioSession, DeviceClass, DeviceEntry, DeviceId, VolumeReading};

/// Session-manager access through the PulseAudio layer tools.
///
/// Works against native PulseAudio and against PipeWire via pipewire-pulse.
/// Queries are one-shot `pactl` invocations; change notifications come from a
/// long-running `pactl subscribe` child parsed on its own reader thread.
pub struct PulseSession {
    subscriber: Child,
}

impl PulseSession {
    /// Spawns the subscription child and starts forwarding its events into
    /// `tx`. When the child dies the forwarder drops `tx`, which surfaces as
    /// a closed event stream in the consuming loop.
    pub fn build(tx: Sender<AudioEvent>) -> AppResult<Self> {
        let mut subscriber = Command::new("pactl")
            .arg("subscribe")
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|source| VolwatchError::Spawn {
                cmd: "pactl subscribe",
                source,
            })?;

        let stdout = subscriber
            .stdout
            .take()
            .expect("subscriber stdout was piped");

        thread::spawn(move || forward_events(stdout, tx));

        Ok(Self { subscriber })
    }
}

impl Drop for PulseSession {
    fn drop(&mut self) {
        // Kill and reap the subscription child.
        let _ = self.subscriber.kill();
        let _ = self.subscriber.wait();
    }
}

impl AudioSession for PulseSession {
    fn enumerate_devices(&mut self) -> AppResult<Vec<DeviceEntry>> {
        let mut devices = Vec::new();
        for class in [DeviceClass::Sink, DeviceClass::Source] {
            for (id, name) in list_class(class)? {
                // Sink monitors enumerate as sources but are not capture
                // endpoints.
                if class == DeviceClass::Source && is_monitor(&name) {
                    continue;
                }
                devices.push(DeviceEntry { id, class });
            }
        }
        Ok(devices)
    }

    fn default_device(&mut self, class: DeviceClass) -> AppResult<DeviceId> {
        let cmd = match class {
            DeviceClass::Sink => "get-default-sink",
            DeviceClass::Source => "get-default-source",
        };
        let name = pactl(&[cmd])?.trim().to_string();
        if name.is_empty() || name == "(null)" {
            return Ok(DeviceId::NONE);
        }
        // Right after a graph mutation the default's name can reference a
        // node that is not enumerable yet.
        Ok(list_class(class)?
            .into_iter()
            .find(|(_, device)| *device == name)
            .map(|(id, _)| id)
            .unwrap_or(DeviceId::INVALID))
    }

    fn volume(&mut self, class: DeviceClass, device: DeviceId) -> AppResult<VolumeReading> {
        let index = device.0.to_string();
        let (volume_cmd, mute_cmd) = match class {
            DeviceClass::Sink => ("get-sink-volume", "get-sink-mute"),
            DeviceClass::Source => ("get-source-volume", "get-source-mute"),
        };
        let level = parse_volume(volume_cmd, &pactl(&[volume_cmd, &index])?)?;
        let muted = parse_mute(mute_cmd, &pactl(&[mute_cmd, &index])?)?;
        Ok(VolumeReading { level, muted })
    }

    fn sync_barrier(&mut self) -> AppResult<()> {
        // A completed `info` roundtrip means the server has drained
        // everything submitted before it.
        pactl(&["info"]).map(drop)
    }
}

fn forward_events(stdout: impl Read, tx: Sender<AudioEvent>) {
    let reader = BufReader::new(stdout);
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!("subscription stream error: {err}");
                break;
            }
        };
        if let Some(event) = parse_subscribe_line(&line) {
            if tx.send(event).is_err() {
                break;
            }
        }
    }
    debug!("subscription stream ended");
}

fn pactl(args: &[&str]) -> AppResult<String> {
    let output = Command::new("pactl")
        .args(args)
        .env("LC_ALL", "C")
        .output()
        .map_err(|source| VolwatchError::Spawn {
            cmd: "pactl",
            source,
        })?;
    if !output.status.success() {
        return Err(VolwatchError::CommandFailed {
            cmd: format!("pactl {}", args.join(" ")),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn list_class(class: DeviceClass) -> AppResult<Vec<(DeviceId, String)>> {
    let listing = match class {
        DeviceClass::Sink => pactl(&["list", "short", "sinks"])?,
        DeviceClass::Source => pactl(&["list", "short", "sources"])?,
    };
    parse_short_list(&listing)
}

fn is_monitor(name: &str) -> bool {
    name.ends_with(".monitor")
}

fn unexpected(cmd: &str, output: &str) -> VolwatchError {
    VolwatchError::UnexpectedOutput {
        cmd: cmd.to_string(),
        output: output.to_string(),
    }
}

/// One `Event 'op' on facility #index` line from `pactl subscribe`, or `None`
/// for facilities and operations the watcher does not track.
fn parse_subscribe_line(line: &str) -> Option<AudioEvent> {
    static EVENT: OnceLock<Regex> = OnceLock::new();
    let regex = EVENT
        .get_or_init(|| Regex::new(r"^Event '([a-z-]+)' on ([a-z-]+) #(\d+)$").expect("valid regex"));

    let captures = regex.captures(line)?;
    let class = match &captures[2] {
        "sink" => DeviceClass::Sink,
        "source" => DeviceClass::Source,
        _ => return None,
    };
    let id = DeviceId(captures[3].parse().ok()?);
    match &captures[1] {
        "change" => Some(AudioEvent::MixerChanged { node: id }),
        "new" => Some(AudioEvent::DeviceAdded { id, class }),
        "remove" => Some(AudioEvent::DeviceRemoved { id, class }),
        _ => None,
    }
}

/// Tab-separated `pactl list short` rows: index, name, then driver details.
fn parse_short_list(listing: &str) -> AppResult<Vec<(DeviceId, String)>> {
    let mut entries = Vec::new();
    for line in listing.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let (Some(index), Some(name)) = (fields.next(), fields.next()) else {
            return Err(unexpected("pactl list short", line));
        };
        let id = index
            .parse()
            .map(DeviceId)
            .map_err(|_| unexpected("pactl list short", line))?;
        entries.push((id, name.to_string()));
    }
    Ok(entries)
}

/// Averages the per-channel percentages of a `Volume:` line into [0.0, 1.0].
fn parse_volume(cmd: &str, output: &str) -> AppResult<f64> {
    static PERCENT: OnceLock<Regex> = OnceLock::new();
    let regex = PERCENT.get_or_init(|| Regex::new(r"(\d+)%").expect("valid regex"));

    let volume_line = output
        .lines()
        .find(|line| line.trim_start().starts_with("Volume:"))
        .ok_or_else(|| unexpected(cmd, output))?;

    let mut total = 0.0;
    let mut channels = 0usize;
    for capture in regex.captures_iter(volume_line) {
        total += capture[1].parse::<f64>().unwrap_or(0.0);
        channels += 1;
    }
    if channels == 0 {
        return Err(unexpected(cmd, output));
    }
    Ok((total / channels as f64 / 100.0).clamp(0.0, 1.0))
}

fn parse_mute(cmd: &str, output: &str) -> AppResult<bool> {
    match output.trim().strip_prefix("Mute: ") {
        Some("yes") => Ok(true),
        Some("no") => Ok(false),
        _ => Err(unexpected(cmd, output)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_lines_map_to_events() {
        assert_eq!(
            parse_subscribe_line("Event 'new' on sink #47"),
            Some(AudioEvent::DeviceAdded {
                id: DeviceId(47),
                class: DeviceClass::Sink,
            })
        );
        assert_eq!(
            parse_subscribe_line("Event 'remove' on source #12"),
            Some(AudioEvent::DeviceRemoved {
                id: DeviceId(12),
                class: DeviceClass::Source,
            })
        );
        assert_eq!(
            parse_subscribe_line("Event 'change' on sink #47"),
            Some(AudioEvent::MixerChanged { node: DeviceId(47) })
        );
    }

    #[test]
    fn unrelated_subscribe_lines_are_ignored() {
        assert_eq!(parse_subscribe_line("Event 'change' on server #0"), None);
        assert_eq!(parse_subscribe_line("Event 'new' on sink-input #99"), None);
        assert_eq!(parse_subscribe_line("Event 'change' on client #8"), None);
        assert_eq!(parse_subscribe_line("not an event line"), None);
    }

    #[test]
    fn volume_output_averages_channels() {
        let output = "Volume: front-left: 39322 /  60% / -13.31 dB,   \
                      front-right: 26214 /  40% / -23.78 dB\n        balance 0.00\n";
        let level = parse_volume("get-sink-volume", output).unwrap();
        assert!((level - 0.50).abs() < f64::EPSILON);
    }

    #[test]
    fn overdriven_volume_is_clamped() {
        let output = "Volume: mono: 98304 / 150% / 10.57 dB\n";
        let level = parse_volume("get-sink-volume", output).unwrap();
        assert_eq!(level, 1.0);
    }

    #[test]
    fn garbage_volume_output_is_an_error() {
        assert!(parse_volume("get-sink-volume", "Mute: no\n").is_err());
        assert!(parse_volume("get-sink-volume", "Volume: none\n").is_err());
    }

    #[test]
    fn mute_states_parse() {
        assert_eq!(parse_mute("get-sink-mute", "Mute: yes\n").unwrap(), true);
        assert_eq!(parse_mute("get-sink-mute", "Mute: no\n").unwrap(), false);
        assert!(parse_mute("get-sink-mute", "Mute: maybe\n").is_err());
    }

    #[test]
    fn short_list_parses_ids_and_names() {
        let listing = "47\talsa_output.pci-0000_00_1f.3.analog-stereo\tPipeWire\ts32le 2ch 48000Hz\tRUNNING\n\
                       61\talsa_input.usb-mic.mono-fallback\tPipeWire\ts16le 1ch 44100Hz\tIDLE\n";
        let entries = parse_short_list(listing).unwrap();
        assert_eq!(
            entries,
            vec![
                (
                    DeviceId(47),
                    "alsa_output.pci-0000_00_1f.3.analog-stereo".to_string()
                ),
                (DeviceId(61), "alsa_input.usb-mic.mono-fallback".to_string()),
            ]
        );
    }

    #[test]
    fn malformed_short_list_is_an_error() {
        assert!(parse_short_list("47 no tabs here").is_err());
    }

    #[test]
    fn monitors_are_recognized_by_name() {
        assert!(is_monitor(
            "alsa_output.pci-0000_00_1f.3.analog-stereo.monitor"
        ));
        assert!(!is_monitor("alsa_input.usb-mic.mono-fallback"));
    }
}
