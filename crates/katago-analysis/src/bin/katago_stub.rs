//! Stand-in analysis engine speaking the KataGo JSON-lines protocol.
//!
//! Invoked like the real engine (`katago-stub analysis -config <cfg> -model
//! <model>`). Behaviour is scripted through `key = value` lines in the
//! config file, which lets tests provoke crashes, timeouts and protocol
//! errors:
//!
//! | key | effect |
//! |-----|--------|
//! | `exit_immediately` | exit before reading anything |
//! | `single_instance_marker` | exit at startup unless this process created the file |
//! | `crash_on_query` | exit without replying when the Nth query arrives |
//! | `crash_marker` | only the first process to create this file crashes |
//! | `silent_first` | never answer the first N queries |
//! | `late_first_ms` | answer the first query after this delay |
//! | `delay_ms` | delay every answer |
//! | `mode` | `normal`, `garbage`, `wrong-id`, `reject` or `missing-fields` |
//! | `warning` | send a warning line before each answer |
//! | `partial` | send an `isDuringSearch` report before each answer |
//! | `score_leads` | comma-separated best-move score lead per turn |

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::process;
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};

struct Script {
    settings: HashMap<String, String>,
}

impl Script {
    fn load(path: Option<&str>) -> Self {
        let text = path
            .and_then(|p| fs::read_to_string(p).ok())
            .unwrap_or_default();
        let settings = text
            .lines()
            .map(|line| line.split('#').next().unwrap_or("").trim())
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();
        Self { settings }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }

    fn flag(&self, key: &str) -> bool {
        matches!(self.get(key), Some("true" | "1" | "yes"))
    }

    fn number(&self, key: &str) -> u64 {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(0)
    }

    fn score_lead(&self, turn: u64) -> f64 {
        self.get("score_leads")
            .and_then(|list| list.split(',').nth(turn as usize))
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0.0)
    }
}

/// Creates `path`, failing if it already exists.
fn claim(path: &str) -> bool {
    OpenOptions::new().write(true).create_new(true).open(path).is_ok()
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let config = args
        .iter()
        .position(|a| a == "-config")
        .and_then(|i| args.get(i + 1))
        .map(String::as_str);
    let script = Script::load(config);

    if script.flag("exit_immediately") {
        eprintln!("katago-stub: configured to exit");
        process::exit(1);
    }
    if let Some(marker) = script.get("single_instance_marker") {
        if !claim(marker) {
            eprintln!("katago-stub: another instance is running");
            process::exit(1);
        }
    }

    eprintln!("katago-stub: Started, ready to begin handling requests");

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut queries = 0u64;

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let Ok(request) = serde_json::from_str::<Value>(&line) else {
            let reply = json!({"error": "Could not parse json"});
            if writeln!(out, "{reply}").and_then(|_| out.flush()).is_err() {
                break;
            }
            continue;
        };
        queries += 1;

        if queries == script.number("crash_on_query") {
            let crash = script.get("crash_marker").map_or(true, claim);
            if crash {
                eprintln!("katago-stub: crashing on query {queries}");
                process::exit(3);
            }
        }
        if queries <= script.number("silent_first") {
            continue;
        }
        if queries == 1 {
            thread::sleep(Duration::from_millis(script.number("late_first_ms")));
        }
        thread::sleep(Duration::from_millis(script.number("delay_ms")));

        let id = request["id"].as_str().unwrap_or("").to_string();
        let turn = request["analyzeTurns"][0].as_u64().unwrap_or(0);
        let visits = request["maxVisits"].as_u64().unwrap_or(100);

        let mut lines = Vec::new();
        if script.flag("warning") {
            lines.push(json!({"id": id, "warning": "Unexpected or unused field", "field": "foo"}).to_string());
        }
        if script.flag("partial") {
            lines.push(json!({"id": id, "isDuringSearch": true, "turnNumber": turn, "moveInfos": []}).to_string());
        }

        let lead = script.score_lead(turn);
        let reply = match script.get("mode").unwrap_or("normal") {
            "garbage" => "this is not json".to_string(),
            "wrong-id" => analysis(&format!("{}", 1000 + queries), turn, lead, visits).to_string(),
            "reject" => json!({"id": id, "error": "Illegal move", "field": "moves"}).to_string(),
            "missing-fields" => json!({"id": id, "turnNumber": turn}).to_string(),
            _ => analysis(&id, turn, lead, visits).to_string(),
        };
        lines.push(reply);

        for reply in lines {
            if writeln!(out, "{reply}").and_then(|_| out.flush()).is_err() {
                process::exit(0);
            }
        }
    }
}

fn analysis(id: &str, turn: u64, lead: f64, visits: u64) -> Value {
    let to_move = if turn % 2 == 0 { "B" } else { "W" };
    json!({
        "id": id,
        "turnNumber": turn,
        "moveInfos": [
            {"move": "D4", "winrate": 0.55, "scoreLead": lead, "visits": visits,
             "order": 0, "pv": ["D4", "Q16", "C16"]},
            {"move": "Q16", "winrate": 0.52, "scoreLead": lead - 1.0, "visits": visits / 2,
             "order": 1, "pv": ["Q16", "D4"]}
        ],
        "rootInfo": {"winrate": 0.54, "scoreLead": lead, "visits": visits, "currentPlayer": to_move}
    })
}
