#![forbid(unsafe_code)]

use std::str::FromStr as _;

use anyhow::Context as _;
use parley_client_core::{ClientConfig, run_session};
use parley_domain::RoomId;
use parley_protocol::frames::ServerFrame;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: parley_client --connect ws://host:port/ws [--token secret] [--room uuid]\n\
\n\
Options:\n\
\t--connect  Gateway endpoint (required)\n\
\t--token    API token secret for bearer authentication\n\
\t--room     Room to join and follow\n\
\t--help     Show this help\n\
"
	);
	std::process::exit(2)
}

struct Args {
	connect: String,
	token: Option<String>,
	room: Option<RoomId>,
}

fn parse_args() -> Args {
	let mut connect = None;
	let mut token = None;
	let mut room = None;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--connect" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--connect must be non-empty (expected ws://host:port/ws)");
					usage_and_exit();
				}
				connect = Some(v);
			}
			"--token" => {
				token = Some(it.next().unwrap_or_else(|| usage_and_exit()));
			}
			"--room" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				match RoomId::from_str(&v) {
					Ok(id) => room = Some(id),
					Err(e) => {
						eprintln!("invalid --room {v:?}: {e}");
						usage_and_exit();
					}
				}
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	let Some(connect) = connect else {
		eprintln!("--connect is required");
		usage_and_exit();
	};
	Args { connect, token, room }
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
	tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false))
		.init();
}

fn print_frame(frame: &ServerFrame) {
	match frame {
		ServerFrame::MessageHistory { room_id, messages } => {
			info!(room = %room_id, count = messages.len(), "message history");
			for m in messages {
				info!(at = m.created_at, author = %m.user_id, "{}", m.content);
			}
		}
		ServerFrame::NewMessage { message } => {
			info!(at = message.created_at, author = %message.user_id, "{}", message.content);
		}
		ServerFrame::Error { message } => {
			error!("server error: {message}");
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let args = parse_args();

	let mut cfg = ClientConfig::new(args.connect.clone());
	if let Some(token) = args.token {
		cfg = cfg.with_bearer_token(token);
	}

	info!(url = %args.connect, "starting session");
	run_session(&cfg, args.room, print_frame)
		.await
		.context("gateway session ended")?;

	Ok(())
}
