//! Plain-text renderings of list and detail views.

use std::fmt::Write;

use crate::broker::{
    ConsumerInfo, DiscardPolicy, RetentionPolicy, ServerInfo, StorageType, StreamInfo,
};
use crate::config::Profile;
use crate::util::{human_bytes, human_duration, limit, truncate_str};

const DESCRIPTION_WIDTH: usize = 32;

pub fn profiles(list: &[Profile], connected: Option<&str>) -> String {
    if list.is_empty() {
        return "no profiles saved".to_string();
    }
    let mut out = String::new();
    for profile in list {
        let mark = if Some(profile.name.as_str()) == connected { '*' } else { ' ' };
        let _ = writeln!(
            out,
            "{mark} {:<16} {:<32} {:<12} {}",
            profile.name,
            profile.url,
            profile.auth().label(),
            truncate_str(&profile.description, DESCRIPTION_WIDTH)
        );
    }
    out.pop();
    out
}

pub fn streams(infos: &[StreamInfo]) -> String {
    if infos.is_empty() {
        return "no streams".to_string();
    }
    let mut out = format!(
        "{:<16} {:>8} {:>10} {:>9}  {}",
        "NAME", "MSGS", "BYTES", "CONSUMERS", "SUBJECTS"
    );
    for info in infos {
        let _ = write!(
            out,
            "\n{:<16} {:>8} {:>10} {:>9}  {}",
            info.config.name,
            info.state.messages,
            human_bytes(info.state.bytes),
            info.state.consumer_count,
            info.config.subjects.join(", ")
        );
    }
    out
}

pub fn stream_detail(info: &StreamInfo) -> String {
    let c = &info.config;
    let s = &info.state;
    let retention = match c.retention {
        RetentionPolicy::Limits => "limits",
        RetentionPolicy::Interest => "interest",
        RetentionPolicy::WorkQueue => "workqueue",
    };
    let discard = match c.discard {
        DiscardPolicy::Old => "old",
        DiscardPolicy::New => "new",
    };
    let storage = match c.storage {
        StorageType::File => "file",
        StorageType::Memory => "memory",
    };
    let max_age = c.max_age.map_or_else(|| "unlimited".to_string(), human_duration);

    let mut out = String::new();
    let _ = writeln!(out, "Stream {}", c.name);
    if !c.description.is_empty() {
        let _ = writeln!(out, "  description:      {}", c.description);
    }
    let _ = writeln!(out, "  subjects:         {}", c.subjects.join(", "));
    let _ = writeln!(out, "  retention:        {retention}");
    let _ = writeln!(out, "  storage:          {storage} (replicas {})", c.replicas);
    let _ = writeln!(out, "  discard:          {discard}");
    let _ = writeln!(out, "  max msgs:         {}", limit(c.max_msgs));
    let _ = writeln!(out, "  max bytes:        {}", limit(c.max_bytes));
    let _ = writeln!(out, "  max age:          {max_age}");
    let _ = writeln!(out, "  max msgs/subject: {}", limit(c.max_msgs_per_subject));
    let _ = writeln!(out, "  max msg size:     {}", limit(i64::from(c.max_msg_size)));
    let _ = writeln!(out, "  max consumers:    {}", limit(c.max_consumers));
    let _ = writeln!(
        out,
        "  messages:         {} ({})",
        s.messages,
        human_bytes(s.bytes)
    );
    if s.messages == 0 {
        let _ = writeln!(out, "  sequences:        empty (last {})", s.last_seq);
    } else {
        let _ = writeln!(out, "  sequences:        {}..={}", s.first_seq, s.last_seq);
    }
    let _ = write!(out, "  consumers:        {}", s.consumer_count);
    out
}

pub fn consumers(stream: &str, names: &[String]) -> String {
    if names.is_empty() {
        return format!("no consumers on {stream}");
    }
    let mut out = format!("Consumers of {stream}:");
    for name in names {
        let _ = write!(out, "\n  {name}");
    }
    out
}

pub fn server(profile: &str, info: &ServerInfo) -> String {
    format!(
        "Server {}\n  profile:  {profile}\n  cluster:  {}\n  version:  {}",
        info.server_id, info.cluster, info.version
    )
}

pub fn consumer_detail(info: &ConsumerInfo) -> String {
    format!(
        "Consumer {}/{}\n  filter:       {}\n  delivered:    {}\n  ack pending:  {}\n  num pending:  {}",
        info.stream, info.name, info.filter, info.delivered, info.ack_pending, info.num_pending
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{StreamConfig, StreamState};
    use std::time::Duration;

    fn orders(messages: u64) -> StreamInfo {
        let mut config = StreamConfig::new("orders", &["orders.>"]);
        config.max_age = Some(Duration::from_secs(86_400));
        StreamInfo {
            config,
            state: StreamState {
                messages,
                bytes: messages * 512,
                first_seq: 1,
                last_seq: messages,
                consumer_count: 1,
            },
        }
    }

    #[test]
    fn stream_table_has_header_and_rows() {
        let text = streams(&[orders(4)]);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("NAME"));
        assert!(lines[1].starts_with("orders"));
        assert!(lines[1].contains("2.0 KiB"));
        assert!(lines[1].ends_with("orders.>"));
        assert_eq!(streams(&[]), "no streams");
    }

    #[test]
    fn detail_shows_limits_and_sequences() {
        let text = stream_detail(&orders(3));
        assert!(text.contains("max age:          1d"));
        assert!(text.contains("max msgs:         unlimited"));
        assert!(text.contains("sequences:        1..=3"));
        let empty = stream_detail(&orders(0));
        assert!(empty.contains("sequences:        empty (last 0)"));
    }

    #[test]
    fn profile_list_marks_connected() {
        let mut local = Profile::new("local", "memory://");
        local.description = "scratch".into();
        let mut prod = Profile::new("prod", "nats://prod:4222");
        prod.token = "t".into();
        let text = profiles(&[local, prod], Some("prod"));
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("  local"));
        assert!(lines[1].starts_with("* prod"));
        assert!(lines[1].contains("token"));
    }

    #[test]
    fn consumer_list() {
        assert_eq!(consumers("orders", &[]), "no consumers on orders");
        assert_eq!(
            consumers("orders", &["ephemeral-0001".to_string()]),
            "Consumers of orders:\n  ephemeral-0001"
        );
    }

    #[test]
    fn server_and_consumer_detail() {
        let info = ServerInfo {
            server_id: "MEMORY".into(),
            cluster: "local".into(),
            version: "0.1.0".into(),
        };
        let text = server("demo", &info);
        assert!(text.starts_with("Server MEMORY"));
        assert!(text.contains("cluster:  local"));
        assert!(text.contains("version:  0.1.0"));

        let consumer = ConsumerInfo {
            stream: "orders".into(),
            name: "ephemeral-0001".into(),
            filter: "orders.*".into(),
            delivered: 4,
            ack_pending: 0,
            num_pending: 2,
        };
        let text = consumer_detail(&consumer);
        assert!(text.starts_with("Consumer orders/ephemeral-0001"));
        assert!(text.contains("delivered:    4"));
        assert!(text.contains("num pending:  2"));
    }
}
