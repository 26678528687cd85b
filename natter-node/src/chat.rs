use console::Style;
use natter_relay::{Event, Node, RelayError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use crate::error::NodeError;

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Text to publish on the current topic.
    Say(String),
    Join(String),
    Leave(String),
    /// Switch the topic messages are published on.
    Switch(String),
    Peers,
    Stats,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

/// Parse a line typed at the chat prompt.
pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Say(line.to_string());
    };
    let mut parts = command.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::trim).unwrap_or_default().to_string();
    match (name, arg.is_empty()) {
        ("join", false) => Input::Join(arg),
        ("leave", false) => Input::Leave(arg),
        ("topic", false) => Input::Switch(arg),
        ("peers", _) => Input::Peers,
        ("stats", _) => Input::Stats,
        ("help", _) => Input::Help,
        ("quit" | "exit", _) => Input::Quit,
        _ => Input::Unknown(line.to_string()),
    }
}

/// Render a received event for the terminal.
pub fn format_event(event: &Event) -> String {
    let origin = event.origin.to_string();
    let short = &origin[origin.len().saturating_sub(8)..];
    format!("[{}] {}: {}", event.topic, short, event.message)
}

/// Apply a `/join`, `/leave` or `/topic` command. `topic` changes only when
/// a switch succeeds.
pub fn change_topics(node: &Node, input: Input, topic: &mut String) -> Result<(), RelayError> {
    match input {
        Input::Join(t) => node.subscribe(&t),
        Input::Leave(t) => node.unsubscribe(&t),
        Input::Switch(t) => {
            node.subscribe(&t)?;
            *topic = t;
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Interactive loop: publish stdin lines, print received events, stop the
/// node on `/quit`, end of input or Ctrl-C.
pub async fn run(node: Node, topic: String) -> Result<(), NodeError> {
    let dim = Style::new().dim();
    let cyan = Style::new().cyan();
    let mut topic = topic;
    let mut events = node.subscribe_events();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!(
        "  {} type a message and press enter, /help for commands",
        dim.apply_to("Chat    ")
    );

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_input(&line) {
                    Input::Say(text) => node.send_message(&topic, &text),
                    input @ (Input::Join(_) | Input::Leave(_) | Input::Switch(_)) => {
                        let previous = topic.clone();
                        match change_topics(&node, input, &mut topic) {
                            Ok(()) if topic != previous => {
                                println!("  now talking on {}", cyan.apply_to(&topic));
                            }
                            Ok(()) => {}
                            Err(e) => println!("  {}", e),
                        }
                    }
                    Input::Peers => {
                        let peers = node.peers();
                        println!("  {} peer(s)", peers.len());
                        for peer in peers.iter() {
                            let topics: Vec<&str> = peer.topics.iter().map(|t| t.as_str()).collect();
                            println!("  {} [{}]", peer.peer_id, topics.join(", "));
                        }
                    }
                    Input::Stats => println!("  {:?}", node.stats()),
                    Input::Help => {
                        println!("  /join <topic>  /leave <topic>  /topic <topic>");
                        println!("  /peers  /stats  /quit");
                    }
                    Input::Quit => break,
                    Input::Empty => {}
                    Input::Unknown(cmd) => println!("  unknown command: {}", cmd),
                }
            }
            event = events.recv() => match event {
                Ok(event) => println!("{}", format_event(&event)),
                Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "terminal fell behind"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    node.shutdown().await?;
    Ok(())
}
