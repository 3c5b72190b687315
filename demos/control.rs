//! Drive one receiver from the command line
//!
//! ```text
//! cargo run --example control -- 192.168.1.50 8010 volume 0.3
//! cargo run --example control -- 192.168.1.50 8010 load http://example.com/video.mp4 "Example"
//! cargo run --example control -- 192.168.1.50 8010 watch
//! ```

use cast_session::{CastController, Command, ControllerConfig, Device, WsTransport};
use std::env;
use std::process::ExitCode;

const USAGE: &str = "usage: control <host> <port> <play|pause|toggle|stop|volume LEVEL|mute|unmute|load URL [TITLE]|watch>";

fn parse_command(args: &[String]) -> Option<Command> {
    let command = match args.first()?.as_str() {
        "play" => Command::Play,
        "pause" => Command::Pause,
        "toggle" => Command::TogglePlayback,
        "stop" => Command::StopApp,
        "mute" => Command::SetMuted(true),
        "unmute" => Command::SetMuted(false),
        "volume" => Command::SetVolume(args.get(1)?.parse().ok()?),
        "load" => {
            let url = args.get(1)?;
            let title = args.get(2).map(String::as_str).unwrap_or(url);
            Command::load_media(url.as_str(), title, None::<String>)
        }
        _ => return None,
    };
    Some(command)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt().init();

    let args: Vec<String> = env::args().skip(1).collect();
    let (host, port) = match (args.first(), args.get(1).and_then(|p| p.parse::<u16>().ok())) {
        (Some(host), Some(port)) => (host.clone(), port),
        _ => {
            eprintln!("{}", USAGE);
            return ExitCode::FAILURE;
        }
    };
    let rest = &args[2..];
    let watch = rest.first().map(String::as_str) == Some("watch");
    let command = if watch { None } else { parse_command(rest) };
    if !watch && command.is_none() {
        eprintln!("{}", USAGE);
        return ExitCode::FAILURE;
    }

    let controller = CastController::new(WsTransport::new(), ControllerConfig::from_env());
    let device = Device::new("receiver", host.as_str(), host.as_str(), port);
    let session = match controller.connect(device).await {
        Ok(session) => session,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(command) = command {
        return match session.dispatch(command).await {
            Ok(()) => {
                println!("{:#?}", session.current());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}", e);
                ExitCode::FAILURE
            }
        };
    }

    // Print every snapshot until the receiver goes away
    let mut updates = session.subscribe();
    while let Ok(state) = updates.recv().await {
        println!(
            "{} app={} player={} volume={:.2}{}",
            if state.connected { "connected" } else { "disconnected" },
            state.running_app_name.as_deref().unwrap_or("-"),
            state.player_state,
            state.volume_level,
            if state.muted { " (muted)" } else { "" }
        );
        if !state.connected {
            break;
        }
    }
    ExitCode::SUCCESS
}
