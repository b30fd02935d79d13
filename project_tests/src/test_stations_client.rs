//! Live client for `server_stations`.
//!
//! Connects to a running server and checks, for as long as it runs:
//! - the first message is `welcome`;
//! - every stream replays its list in the same circular order.
//!
//! Every report interval it prints the message rate per stream over the last
//! window.

use chrono::{DateTime, Duration, Utc};
use clap::Parser;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// WebSocket endpoint of the server
    #[clap(short, long, default_value = "ws://127.0.0.1:8080/ws")]
    url: String,

    /// Report interval in seconds
    #[clap(short, long, default_value_t = 60)]
    report_interval_secs: u64,
}

#[derive(Debug, Deserialize)]
struct StationMessage {
    #[serde(rename = "type")]
    msg_type: String,
    message: Option<String>,
    #[serde(rename = "streamId")]
    stream_id: Option<usize>,
    data: Option<Value>,
}

/// Order tracking for one stream.
#[derive(Default)]
struct StreamTrack {
    seen: Vec<Value>,
    cycle_len: Option<usize>,
    timestamps: VecDeque<DateTime<Utc>>,
}

impl StreamTrack {
    /// Records one `data` payload and returns the expected payload when it breaks the
    /// cycle.
    ///
    /// Records are compared whole, so repeated charger ids with different contents are
    /// fine. The cycle length is taken from the first recurrence of the stream's first
    /// record, which assumes that exact record appears only once per list.
    fn observe(&mut self, record: Value, now: DateTime<Utc>) -> Option<Value> {
        self.timestamps.push_back(now);

        if self.cycle_len.is_none() && self.seen.first() == Some(&record) {
            self.cycle_len = Some(self.seen.len());
        }
        self.seen.push(record);

        let len = self.cycle_len?;
        let pos = self.seen.len() - 1;
        let expected = &self.seen[pos % len];
        (*expected != self.seen[pos]).then(|| expected.clone())
    }
}

#[derive(Default)]
struct Stats {
    global_timestamps: VecDeque<DateTime<Utc>>,
    streams: BTreeMap<usize, StreamTrack>,
    violations: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let url = Url::parse(&args.url)?;

    let stats = Arc::new(Mutex::new(Stats::default()));

    // Clone for the reporter task
    let stats_reporter = Arc::clone(&stats);
    let report_interval = args.report_interval_secs.max(1);
    tokio::spawn(async move {
        loop {
            sleep(std::time::Duration::from_secs(report_interval)).await;
            let window_start = Utc::now() - Duration::seconds(report_interval as i64);

            let mut data = stats_reporter.lock().unwrap_or_else(PoisonError::into_inner);

            while data.global_timestamps.front().is_some_and(|&t| t < window_start) {
                data.global_timestamps.pop_front();
            }
            let global_rate = data.global_timestamps.len();

            let mut rates = Vec::new();
            for (stream_id, track) in data.streams.iter_mut() {
                while track.timestamps.front().is_some_and(|&t| t < window_start) {
                    track.timestamps.pop_front();
                }
                let cycle = track
                    .cycle_len
                    .map_or_else(|| "?".to_string(), |len| len.to_string());
                rates.push(format!(
                    "stream {}: {} msg (cycle {})",
                    stream_id,
                    track.timestamps.len(),
                    cycle
                ));
            }

            println!("\n----- {}s Summary -----", report_interval);
            println!("Global: {} msg", global_rate);
            println!(
                "Streams: {}",
                if rates.is_empty() { "No data".to_string() } else { rates.join(", ") }
            );
            println!("Order violations: {}", data.violations);
            println!("----------------------------\n");
        }
    });

    println!("Connecting to {}...", url);
    let (ws_stream, _) = connect_async(url.as_str()).await?;
    let (_write, mut read) = ws_stream.split();
    println!("Connected. Press Ctrl+C to stop.");

    let mut first = true;
    while let Some(msg) = read.next().await {
        let text = match msg? {
            Message::Text(text) => text,
            Message::Close(frame) => {
                println!("Server closed the connection: {:?}", frame);
                break;
            }
            _ => continue,
        };

        let parsed: StationMessage = match serde_json::from_str(text.as_str()) {
            Ok(parsed) => parsed,
            Err(e) => {
                eprintln!("Unparseable message {}: {}", text.as_str(), e);
                continue;
            }
        };

        if first {
            first = false;
            if parsed.msg_type == "welcome" {
                println!("Welcome: {}", parsed.message.as_deref().unwrap_or_default());
                continue;
            }
            eprintln!("First message was '{}', expected 'welcome'", parsed.msg_type);
            stats.lock().unwrap_or_else(PoisonError::into_inner).violations += 1;
        }

        match parsed.msg_type.as_str() {
            "station_update" => {
                let (Some(stream_id), Some(data)) = (parsed.stream_id, parsed.data) else {
                    eprintln!("station_update without streamId or data");
                    continue;
                };
                let now = Utc::now();
                let mut stats = stats.lock().unwrap_or_else(PoisonError::into_inner);
                stats.global_timestamps.push_back(now);
                let broken = stats
                    .streams
                    .entry(stream_id)
                    .or_default()
                    .observe(data.clone(), now);
                if let Some(expected) = broken {
                    stats.violations += 1;
                    eprintln!("stream {}: got {}, expected {}", stream_id, data, expected);
                }
            }
            "error" => eprintln!("Server error: {}", parsed.message.as_deref().unwrap_or_default()),
            other => eprintln!("Unexpected message type '{}'", other),
        }
    }

    let violations = stats.lock().unwrap_or_else(PoisonError::into_inner).violations;
    println!("Connection ended with {} order violations.", violations);
    Ok(())
}
