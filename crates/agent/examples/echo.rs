use clap::Parser;
use color_eyre::{eyre::WrapErr, Result};
use rop_agent::transport::WebSocketTransport;
use rop_agent::{Agent, Evaluation, Exposed, HostValue};
use rop_wire::Kind;
use tracing::info;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};
use url::Url;

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about)]
pub struct Args {
	/// WebSocket URL of the peer to connect to.
	#[clap(long)]
	url: Url,
}

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let env_filter = EnvFilter::builder()
		.with_default_directive(LevelFilter::INFO.into())
		.from_env_lossy();
	tracing_subscriber::fmt()
		.with_target(true)
		.with_level(true)
		.with_env_filter(env_filter)
		.init();

	let args = Args::parse();

	let (socket, _response) = tokio_tungstenite::connect_async(args.url.as_str())
		.await
		.wrap_err("failed to connect to peer")?;
	info!("connected to peer");

	let double = Exposed::Function(Box::new(|args: &[HostValue]| match args.first() {
		Some(HostValue::Number(n)) => Evaluation::Ready(HostValue::Number(n * 2.0)),
		_ => Evaluation::Err(rop_agent::HostError {
			message: "expected a single number argument".to_owned(),
			stack: None,
			cause: None,
		}),
	}));

	let agent = Agent::new(vec![("double", double)], vec![("double", Kind::Function)]);

	let remote_double = agent.remote("double").expect("declared above");
	let observation = remote_double.call(vec![HostValue::Number(21.0)]);
	info!("opened observation of peer's double(21)");

	let transport = WebSocketTransport::new(socket);
	let agent_for_run = agent.clone();
	let run_handle = tokio::spawn(async move { agent_for_run.run(transport).await });

	for _ in 0..20 {
		tokio::time::sleep(std::time::Duration::from_millis(100)).await;
		match observation.get() {
			Evaluation::Ready(v) => {
				info!(result = ?v.to_plain_json(), "double(21) resolved");
				break;
			}
			Evaluation::Pending(_) => continue,
			Evaluation::Err(e) => {
				info!(error = %e, "double(21) failed");
				break;
			}
		}
	}
	drop(observation);

	run_handle.await.wrap_err("agent task panicked")?.wrap_err("agent loop exited")?;

	Ok(())
}
