//! Subscribe to a Pusher channel and print events bound by name.
//!
//! ```sh
//! cargo run -p pusher-client --example listen -- <APP_KEY> <CHANNEL> <EVENT>... [--host HOST --scheme ws]
//! ```
//!
//! Or pass the app key via environment variable:
//! ```sh
//! PUSHER_APP_KEY=abc123 cargo run -p pusher-client --example listen -- <CHANNEL> <EVENT>...
//! ```
//!
//! Event payloads are printed to stdout (pipe to `jq` for formatting).

use pusher_client::{Binding, ClientConfig, Event, connect_with_config};

struct Args {
    app_key: String,
    channel: String,
    events: Vec<String>,
    host: Option<String>,
    scheme: Option<String>,
}

fn parse_args() -> Result<Args, Box<dyn std::error::Error>> {
    let mut positional = Vec::new();
    let mut host = None;
    let mut scheme = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--host" => host = Some(args.next().ok_or("--host needs a value")?),
            "--scheme" => scheme = Some(args.next().ok_or("--scheme needs a value")?),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let app_key = match std::env::var("PUSHER_APP_KEY") {
        Ok(key) => key,
        Err(_) => positional
            .next()
            .ok_or("usage: listen <APP_KEY> <CHANNEL> <EVENT>...")?,
    };
    let channel = positional
        .next()
        .ok_or("usage: listen <APP_KEY> <CHANNEL> <EVENT>...")?;
    let events: Vec<String> = positional.collect();
    if events.is_empty() {
        return Err("at least one EVENT name is required".into());
    }

    Ok(Args {
        app_key,
        channel,
        events,
        host,
        scheme,
    })
}

fn print_event(event: &Event) {
    eprintln!(
        "[event] name={} channel={}",
        event.name,
        event.channel.as_deref().unwrap_or("-"),
    );
    println!("{}", event.data);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args = parse_args()?;
    let mut config = ClientConfig::new(args.app_key);
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(scheme) = args.scheme {
        config.scheme = scheme;
    }

    let session = connect_with_config(config).await?;
    eprintln!(
        "[connected] socket_id={}",
        session.socket_id().unwrap_or("-")
    );

    let mut bindings: Vec<Binding> = Vec::new();
    for name in &args.events {
        bindings.push(session.bind(name).await?);
    }
    session.subscribe(&args.channel).await?;
    eprintln!("[subscribed] {}", args.channel);

    let (tx, mut rx) = tokio::sync::mpsc::channel::<Event>(64);
    for mut binding in bindings {
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Some(event) = binding.next().await {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
    }
    drop(tx);

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => print_event(&event),
                None => {
                    eprintln!("[closed]");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("[interrupted]");
                session.close().await;
                break;
            }
        }
    }

    Ok(())
}
