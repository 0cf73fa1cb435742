//! Help text for the interactive prompt.

use crate::command::attributes::MUTABLE_ATTRIBUTES;

struct Topic {
    keys: &'static [&'static str],
    lines: &'static [&'static str],
}

static TOPICS: &[Topic] = &[
    Topic {
        keys: &["q"],
        lines: &["stop everything on the board and leave the session"],
    },
    Topic {
        keys: &["v"],
        lines: &[
            "'v' or <Enter> plays the active stimulus once",
            "'v<n>' plays it n times, e.g. 'v5'",
        ],
    },
    Topic {
        keys: &["r"],
        lines: &[
            "'r' switches the LED on/off",
            "'r<seconds>' switches it on for a fixed time, e.g. 'r5' or 'r2.5'",
        ],
    },
    Topic {
        keys: &["t"],
        lines: &[
            "plays the stimulus and runs the LED for LED_retention ms, offset by videoLED_timer ms",
            "a positive timer starts the LED first, a negative one starts the video first",
            "with update_timer = true the timer (in seconds) is asked before each 't'",
        ],
    },
    Topic {
        keys: &["p"],
        lines: &[
            "LED pulse train using pulse_span (s), pulse_frequency (Hz) and pulse_width (ms)",
            "with update_pulse = true the three values are asked before each 'p'",
            "pulse widths below 2 ms are raised to 2 ms",
        ],
    },
    Topic {
        keys: &["isi"],
        lines: &[
            "'isi<seconds>' waits between stimuli, e.g. 'isi5'",
            "inside a series the wait is adjusted to compensate for timing drift",
        ],
    },
    Topic {
        keys: &["set"],
        lines: &[
            "'set:<name>=<value>' changes a parameter, e.g. 'set:pulse_span = 5'",
            "booleans accept true/false/1/0",
        ],
    },
    Topic {
        keys: &["show"],
        lines: &["'show:<name>' prints a parameter or a device state, e.g. 'show:pump_state'"],
    },
    Topic {
        keys: &["stim"],
        lines: &["selects the active stimulus; the name is asked after the command"],
    },
    Topic {
        keys: &["trig"],
        lines: &["sends a 100 ms pulse on the trigger pin"],
    },
    Topic {
        keys: &["pump"],
        lines: &[
            "'pump' toggles, 'pump:on' / 'pump:off' force the state",
            "'pump:value:<0-255>' sets the pump power",
            "switching the pump off closes every valve",
        ],
    },
    Topic {
        keys: &["shock"],
        lines: &["'shock' toggles, 'shock:on' / 'shock:off' force the shock pulses"],
    },
    Topic {
        keys: &["air", "odor_a", "odor_b", "valves"],
        lines: &[
            "'<valve>' toggles, '<valve>:on' / '<valve>:off' open or close it",
            "valves: air, odor_a, odor_b; the pump must be on to open a valve",
        ],
    },
    Topic {
        keys: &["stop"],
        lines: &[
            "terminates every operation on the board and resets the tracked state",
            "use it after a timeout or unexpected reply from the board",
        ],
    },
    Topic {
        keys: &["series", ">"],
        lines: &[
            "chain commands with '>', e.g. 'r5 > isi5 > set:pulse_span=10 > p'",
            "repeat a group with '(<series>) * <n>', e.g. 'trig > isi120 > (p > isi4) * 10 > r2'",
            "the whole series is checked before anything runs",
        ],
    },
    Topic {
        keys: &["shortcuts", "<-"],
        lines: &[
            "'<name> <- <series>' stores a shortcut, e.g. 'puff <- pump:on > air:on > isi5 > air:off'",
            "type the name to run it; 'shortcuts' reloads and lists them",
        ],
    },
    Topic {
        keys: &["load"],
        lines: &["lists saved protocol files, newest first"],
    },
    Topic {
        keys: &["well", "u", "run"],
        lines: &["small conveniences: 'well' prints well_times times, 'u' pauses u_time seconds"],
    },
    Topic {
        keys: &["ctrl+c"],
        lines: &[
            "<Ctrl+C> aborts the current command and stops the board",
            "you are then asked whether to continue or terminate",
        ],
    },
];

/// Help for one topic, or the overview when `topic` is `None` or unknown.
pub fn render(topic: Option<&str>, stim_alias: &str, stimuli: &[String]) -> String {
    let wanted = topic.map(|t| t.trim().to_lowercase());
    if let Some(wanted) = &wanted {
        if *wanted == stim_alias.to_lowercase() {
            return stimulus_help(stim_alias, stimuli);
        }
        if let Some(found) = TOPICS.iter().find(|t| t.keys.contains(&wanted.as_str())) {
            let mut out = format!("{}:\n", found.keys.join(", "));
            for line in found.lines {
                out.push_str("  ");
                out.push_str(line);
                out.push('\n');
            }
            if found.keys.contains(&"set") {
                out.push_str("  parameters:\n");
                for spec in MUTABLE_ATTRIBUTES {
                    out.push_str(&format!("    {} {}\n", spec.name, spec.unit));
                }
            }
            return out;
        }
    }

    let mut out = String::from("Commands (type 'help <command>' for details):\n");
    for topic in TOPICS {
        out.push_str(&format!(
            "  {:<24}{}\n",
            topic.keys.join(", "),
            topic.lines.first().copied().unwrap_or_default()
        ));
    }
    out.push_str(&format!(
        "  {:<24}select the active stimulus\n",
        stim_alias
    ));
    out
}

fn stimulus_help(stim_alias: &str, stimuli: &[String]) -> String {
    format!(
        "{stim_alias}:\n  selects the active stimulus\n  available: {}\n",
        if stimuli.is_empty() {
            "(none)".to_string()
        } else {
            stimuli.join(", ")
        }
    )
}
