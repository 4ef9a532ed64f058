use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use pinokio_inspector::logging::{self, LogConfig};
use pinokio_inspector::{
    Browser, InspectorConfig, InspectorEvent, LaunchConfig, PageInspector, SelectionPayload,
};

#[derive(Parser)]
#[command(name = "pinokio-inspect")]
#[command(about = "Open a page and pick an element inside one of its frames", long_about = None)]
#[command(version)]
struct Cli {
    /// Page to open
    url: String,

    /// URL of the frame to inspect
    #[arg(long)]
    frame_url: Option<String>,

    /// Name of the frame to inspect
    #[arg(long)]
    frame_name: Option<String>,

    /// Host-assigned frame node id
    #[arg(long)]
    frame_node_id: Option<String>,

    /// Among frames matching --frame-url, pick the n-th (depth, then document order)
    #[arg(long)]
    relative_ordinal: Option<i64>,

    /// Index into the flattened frame list
    #[arg(long)]
    frame_index: Option<i64>,

    /// Raw selection payload as JSON; overrides the individual frame flags
    #[arg(long)]
    payload: Option<String>,

    /// Show the browser window
    #[arg(long)]
    visible: bool,

    /// Chrome/Chromium binary
    #[arg(long)]
    chrome_path: Option<String>,

    /// Do not capture screenshots; picks report a null image
    #[arg(long)]
    no_screenshots: bool,

    /// Screenshot timeout in milliseconds
    #[arg(long, default_value_t = 3000)]
    screenshot_timeout_ms: u64,

    /// Keep running after the first pick or cancellation
    #[arg(long)]
    keep_going: bool,

    /// Log file (defaults to the temp directory)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn selection(&self) -> pinokio_inspector::Result<SelectionPayload> {
        if let Some(raw) = &self.payload {
            let value = serde_json::from_str(raw)
                .map_err(|e| pinokio_inspector::Error::InvalidPayload(e.to_string()))?;
            return SelectionPayload::from_json(value);
        }
        Ok(SelectionPayload {
            frame_url: self.frame_url.clone(),
            frame_name: self.frame_name.clone(),
            frame_node_id: self.frame_node_id.clone(),
            candidate_relative_ordinal: self.relative_ordinal,
            frame_index: self.frame_index,
        })
    }
}

fn print_event(event: &InspectorEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{}", line),
        Err(e) => tracing::warn!("Unprintable event: {}", e),
    }
}

fn finishes_session(event: &InspectorEvent) -> bool {
    match event {
        InspectorEvent::Frame { message } => message.is_terminal(),
        InspectorEvent::Cancelled { .. } => true,
        InspectorEvent::Screenshot { .. } => false,
    }
}

async fn run(cli: Cli) -> pinokio_inspector::Result<()> {
    let payload = cli.selection()?;

    let browser = Browser::launch_with_config(LaunchConfig {
        headless: !cli.visible,
        chrome_path: cli.chrome_path.clone(),
        ..Default::default()
    })
    .await?;

    let page = Arc::new(browser.new_page(&cli.url).await?);
    page.wait_for_load(Duration::from_secs(30)).await?;

    let inspector = PageInspector::new(
        page,
        InspectorConfig {
            screenshot_timeout: Duration::from_millis(cli.screenshot_timeout_ms),
            relay_screenshots: !cli.no_screenshots,
            ..Default::default()
        },
    );

    let info = inspector.start(&payload).await?;
    tracing::info!(url = %info.frame_url, "Inspecting");
    println!("{}", serde_json::json!({ "event": "session", "frameUrl": info.frame_url }));

    while let Some(event) = inspector.next_event().await {
        print_event(&event);
        if finishes_session(&event) && !cli.keep_going {
            break;
        }
    }

    inspector.stop().await;
    browser.close().await
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // stdout carries JSON lines, so logs only go to the file
    let log_config = LogConfig {
        file: cli.log_file.clone().or(LogConfig::default().file),
        filter: if cli.verbose { "debug" } else { "info" }.to_string(),
        ..LogConfig::file_only()
    };
    let guard = match logging::init(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Logging disabled: {}", e);
            None
        }
    };

    let code = match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    };
    // Flushes the file writer before the process exits
    drop(guard);
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_build_payload() {
        let cli = Cli::try_parse_from([
            "pinokio-inspect",
            "http://host/",
            "--frame-name",
            "app",
            "--relative-ordinal",
            "1",
            "--no-screenshots",
        ])
        .unwrap();
        assert!(cli.no_screenshots);
        let payload = cli.selection().unwrap();
        assert_eq!(payload.frame_name.as_deref(), Some("app"));
        assert_eq!(payload.candidate_relative_ordinal, Some(1));
        assert_eq!(payload.frame_url, None);
    }

    #[test]
    fn test_raw_payload_overrides_flags() {
        let cli = Cli::try_parse_from([
            "pinokio-inspect",
            "http://host/",
            "--frame-name",
            "ignored",
            "--payload",
            r#"{"frameNodeId":"node-7","frameIndex":2}"#,
        ])
        .unwrap();
        let payload = cli.selection().unwrap();
        assert_eq!(payload.frame_node_id.as_deref(), Some("node-7"));
        assert_eq!(payload.frame_index, Some(2));
        assert_eq!(payload.frame_name, None);
    }

    #[test]
    fn test_terminal_events_finish() {
        assert!(finishes_session(&InspectorEvent::Cancelled {
            frame_url: String::new()
        }));
        assert!(!finishes_session(&InspectorEvent::Frame {
            message: pinokio_inspector::InspectorMessage::Started {
                frame_url: String::new()
            }
        }));
    }
}
