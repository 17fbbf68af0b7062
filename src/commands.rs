use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Profiles,
    AddProfile { name: String, url: String },
    RemoveProfile(String),
    Connect(String),
    Disconnect,
    ServerInfo,
    Streams,
    StreamInfo(String),
    AddStream(String),
    Consumers(String),
    ConsumerInfo { stream: String, name: String },
    Open { stream: String, filter: String },
    Filter(String),
    Next,
    Prev,
    Publish { subject: String, body: String },
    Close,
    DeleteStream(String),
    DeleteConsumer { stream: String, name: String },
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command: {0} (try 'help')")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

pub const HELP: &str = "\
commands:
  profiles                      list saved connection profiles
  add-profile <name> <url>      save a profile (no credentials)
  remove-profile <name>         delete a saved profile
  connect <profile>             connect and start the activity view
  disconnect                    close the current connection
  server-info                   show the connected server
  streams                       list streams
  stream-info <stream>          show stream configuration and state
  add-stream <json>             create a stream from a JSON definition
  consumers <stream>            list consumers of a stream
  consumer-info <stream> <c>    show a consumer's delivery state
  open <stream> [filter]        explore a stream (filter defaults to >)
  filter <subject>              change the explorer filter
  next | n                      fetch the next message
  prev | p                      fetch the previous message
  pub <subject> <body>          publish, then show the new message
  close                         leave the explorer
  delete-stream <stream>        delete a stream (repeat to confirm)
  delete-consumer <stream> <c>  delete a consumer (repeat to confirm)
  help                          this text
  quit                          exit";

/// Parse one input line. Blank lines are `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let args: Vec<&str> = rest.split_whitespace().collect();

    let cmd = match word {
        "profiles" => Command::Profiles,
        "add-profile" => match args.as_slice() {
            [name, url] => Command::AddProfile {
                name: name.to_string(),
                url: url.to_string(),
            },
            _ => return Err(CommandError::Usage("add-profile <name> <url>")),
        },
        "remove-profile" => Command::RemoveProfile(one(&args, "remove-profile <name>")?),
        "connect" => match args.as_slice() {
            [name] => Command::Connect(name.to_string()),
            _ => return Err(CommandError::Usage("connect <profile>")),
        },
        "disconnect" => Command::Disconnect,
        "server-info" => Command::ServerInfo,
        "streams" => Command::Streams,
        "stream-info" => Command::StreamInfo(one(&args, "stream-info <stream>")?),
        "add-stream" if !rest.is_empty() => Command::AddStream(rest.to_string()),
        "add-stream" => return Err(CommandError::Usage("add-stream <json>")),
        "consumers" => Command::Consumers(one(&args, "consumers <stream>")?),
        "consumer-info" => match args.as_slice() {
            [stream, name] => Command::ConsumerInfo {
                stream: stream.to_string(),
                name: name.to_string(),
            },
            _ => return Err(CommandError::Usage("consumer-info <stream> <consumer>")),
        },
        "open" => match args.as_slice() {
            [stream] => Command::Open {
                stream: stream.to_string(),
                filter: String::new(),
            },
            [stream, filter] => Command::Open {
                stream: stream.to_string(),
                filter: filter.to_string(),
            },
            _ => return Err(CommandError::Usage("open <stream> [filter]")),
        },
        "filter" => Command::Filter(args.first().map(|s| s.to_string()).unwrap_or_default()),
        "next" | "n" => Command::Next,
        "prev" | "p" => Command::Prev,
        "pub" => {
            // the body keeps its inner spacing
            let (subject, body) = rest
                .split_once(char::is_whitespace)
                .map(|(s, b)| (s, b.trim_start()))
                .unwrap_or((rest, ""));
            if subject.is_empty() {
                return Err(CommandError::Usage("pub <subject> <body>"));
            }
            Command::Publish {
                subject: subject.to_string(),
                body: body.to_string(),
            }
        }
        "close" => Command::Close,
        "delete-stream" => Command::DeleteStream(one(&args, "delete-stream <stream>")?),
        "delete-consumer" => match args.as_slice() {
            [stream, name] => Command::DeleteConsumer {
                stream: stream.to_string(),
                name: name.to_string(),
            },
            _ => return Err(CommandError::Usage("delete-consumer <stream> <consumer>")),
        },
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(cmd))
}

fn one(args: &[&str], usage: &'static str) -> Result<String, CommandError> {
    match args {
        [arg] => Ok(arg.to_string()),
        _ => Err(CommandError::Usage(usage)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_is_nothing() {
        assert_eq!(parse("   "), Ok(None));
    }

    #[test]
    fn open_with_and_without_filter() {
        assert_eq!(
            parse("open orders").unwrap(),
            Some(Command::Open {
                stream: "orders".into(),
                filter: String::new()
            })
        );
        assert_eq!(
            parse("open orders orders.*").unwrap(),
            Some(Command::Open {
                stream: "orders".into(),
                filter: "orders.*".into()
            })
        );
        assert!(parse("open").is_err());
    }

    #[test]
    fn publish_keeps_body_spacing() {
        assert_eq!(
            parse("pub orders.received hello  big   world").unwrap(),
            Some(Command::Publish {
                subject: "orders.received".into(),
                body: "hello  big   world".into()
            })
        );
        assert_eq!(
            parse("pub orders.received").unwrap(),
            Some(Command::Publish {
                subject: "orders.received".into(),
                body: String::new()
            })
        );
        assert_eq!(parse("pub"), Err(CommandError::Usage("pub <subject> <body>")));
    }

    #[test]
    fn add_stream_takes_raw_json() {
        let line = r#"add-stream {"name":"jobs", "subjects":["jobs.*"]}"#;
        assert_eq!(
            parse(line).unwrap(),
            Some(Command::AddStream(r#"{"name":"jobs", "subjects":["jobs.*"]}"#.into()))
        );
    }

    #[test]
    fn filter_without_argument_resets() {
        assert_eq!(parse("filter").unwrap(), Some(Command::Filter(String::new())));
    }

    #[test]
    fn short_aliases() {
        assert_eq!(parse("n").unwrap(), Some(Command::Next));
        assert_eq!(parse("p").unwrap(), Some(Command::Prev));
        assert_eq!(parse("exit").unwrap(), Some(Command::Quit));
    }

    #[test]
    fn profile_commands() {
        assert_eq!(
            parse("add-profile local memory://").unwrap(),
            Some(Command::AddProfile {
                name: "local".into(),
                url: "memory://".into()
            })
        );
        assert!(parse("add-profile local").is_err());
        assert_eq!(
            parse("remove-profile local").unwrap(),
            Some(Command::RemoveProfile("local".into()))
        );
    }

    #[test]
    fn info_commands() {
        assert_eq!(parse("server-info").unwrap(), Some(Command::ServerInfo));
        assert_eq!(
            parse("consumer-info orders ephemeral-0001").unwrap(),
            Some(Command::ConsumerInfo {
                stream: "orders".into(),
                name: "ephemeral-0001".into()
            })
        );
        assert_eq!(
            parse("consumer-info orders"),
            Err(CommandError::Usage("consumer-info <stream> <consumer>"))
        );
    }

    #[test]
    fn unknown_and_bad_arity() {
        assert_eq!(parse("frobnicate"), Err(CommandError::Unknown("frobnicate".into())));
        assert!(parse("delete-consumer orders").is_err());
        assert!(parse("stream-info a b").is_err());
    }
}
