//! SSDP packet formatting and parsing.
//!
//! Bridges announce themselves with `NOTIFY` packets:
//!
//! ```text
//! NOTIFY * HTTP/1.1
//! HOST: 239.255.255.250:1900
//! CACHE-CONTROL: max-age=1800
//! LOCATION: grpc://192.168.1.20:50051
//! NT: falnet_nerves:bridge
//! NTS: ssdp:alive
//! SERVER: nerves/0.2.0 UPnP/1.1
//! USN: uuid:x10-bridge
//! ```

/// Multicast group and port SSDP traffic is sent to.
pub const MULTICAST_ADDR: &str = "239.255.255.250:1900";

pub const SSDP_PORT: u16 = 1900;

/// Notification type announced by every Nerves bridge (and hub).
pub const BRIDGE_NOTIFICATION_TYPE: &str = "falnet_nerves:bridge";

/// Notification type announced by Nanoleaf Aurora panels.
pub const NANOLEAF_NOTIFICATION_TYPE: &str = "nanoleaf_aurora:light";

pub const GRPC_SCHEME: &str = "grpc://";

const NTS_ALIVE: &str = "ssdp:alive";
const NTS_BYEBYE: &str = "ssdp:byebye";

/// `NTS` value of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyKind {
    Alive,
    ByeBye,
}

impl NotifyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyKind::Alive => NTS_ALIVE,
            NotifyKind::ByeBye => NTS_BYEBYE,
        }
    }
}

/// A presence notification, either a multicast `NOTIFY` or a unicast reply
/// to an `M-SEARCH` (which is treated as alive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notify {
    pub kind: NotifyKind,
    /// `NT` (or `ST` for search replies).
    pub notification_type: String,
    pub usn: String,
    pub location: Option<String>,
    pub server: Option<String>,
    pub max_age: Option<u64>,
}

impl Notify {
    pub fn alive(
        notification_type: impl Into<String>,
        usn: impl Into<String>,
        location: impl Into<String>,
        server: impl Into<String>,
        max_age: u64,
    ) -> Self {
        Self {
            kind: NotifyKind::Alive,
            notification_type: notification_type.into(),
            usn: usn.into(),
            location: Some(location.into()),
            server: Some(server.into()),
            max_age: Some(max_age),
        }
    }

    pub fn byebye(notification_type: impl Into<String>, usn: impl Into<String>) -> Self {
        Self {
            kind: NotifyKind::ByeBye,
            notification_type: notification_type.into(),
            usn: usn.into(),
            location: None,
            server: None,
            max_age: None,
        }
    }

    /// Render as a `NOTIFY` packet addressed to `host`.
    pub fn to_packet(&self, host: &str) -> String {
        let mut packet = format!("NOTIFY * HTTP/1.1\r\nHOST: {}\r\n", host);

        if let Some(max_age) = self.max_age {
            packet.push_str(&format!("CACHE-CONTROL: max-age={}\r\n", max_age));
        }
        if let Some(ref location) = self.location {
            packet.push_str(&format!("LOCATION: {}\r\n", location));
        }
        packet.push_str(&format!("NT: {}\r\n", self.notification_type));
        packet.push_str(&format!("NTS: {}\r\n", self.kind.as_str()));
        if let Some(ref server) = self.server {
            packet.push_str(&format!("SERVER: {}\r\n", server));
        }
        packet.push_str(&format!("USN: {}\r\n\r\n", self.usn));

        packet
    }

    /// Parse a `NOTIFY` packet or an `M-SEARCH` reply.
    ///
    /// Returns `None` for anything else, including `M-SEARCH` requests and
    /// packets missing a type or USN.
    pub fn parse(packet: &str) -> Option<Self> {
        let mut lines = packet.lines();
        let start = lines.next()?.trim();

        let is_notify = starts_with_ignore_case(start, "NOTIFY");
        let is_reply = start.starts_with("HTTP/1.1 200") || start.starts_with("HTTP/1.0 200");
        if !is_notify && !is_reply {
            return None;
        }

        let mut nt = None;
        let mut st = None;
        let mut nts = None;
        let mut usn = None;
        let mut location = None;
        let mut server = None;
        let mut max_age = None;

        for line in lines {
            let line = line.trim();

            if let Some(value) = extract_header_value(line, "NT:") {
                nt = Some(value);
            } else if let Some(value) = extract_header_value(line, "NTS:") {
                nts = Some(value);
            } else if let Some(value) = extract_header_value(line, "ST:") {
                st = Some(value);
            } else if let Some(value) = extract_header_value(line, "USN:") {
                usn = Some(value);
            } else if let Some(value) = extract_header_value(line, "LOCATION:") {
                location = Some(value);
            } else if let Some(value) = extract_header_value(line, "SERVER:") {
                server = Some(value);
            } else if let Some(value) = extract_header_value(line, "CACHE-CONTROL:") {
                max_age = parse_max_age(&value);
            }
        }

        let kind = if is_notify {
            match nts.as_deref() {
                Some(v) if v.eq_ignore_ascii_case(NTS_ALIVE) => NotifyKind::Alive,
                Some(v) if v.eq_ignore_ascii_case(NTS_BYEBYE) => NotifyKind::ByeBye,
                _ => return None,
            }
        } else {
            NotifyKind::Alive
        };

        let notification_type = if is_notify { nt? } else { st? };

        Some(Self {
            kind,
            notification_type,
            usn: usn?,
            location,
            server,
            max_age,
        })
    }
}

/// USN announced for a bridge id.
pub fn usn_for(bridge_id: &str) -> String {
    format!("uuid:{}", bridge_id)
}

/// Recover the bridge id from a USN (`uuid:<id>` with an optional
/// `::<type>` suffix).
pub fn bridge_id_from_usn(usn: &str) -> &str {
    let id = usn
        .strip_prefix("uuid:")
        .or_else(|| usn.strip_prefix("UUID:"))
        .unwrap_or(usn);
    match id.find("::") {
        Some(idx) => &id[..idx],
        None => id,
    }
}

/// `LOCATION` value for a gRPC endpoint.
pub fn grpc_location(host: &str, port: u16) -> String {
    format!("{}{}:{}", GRPC_SCHEME, host, port)
}

/// Drop the `grpc://` scheme, leaving `host:port`.
pub fn strip_grpc_scheme(location: &str) -> &str {
    location.strip_prefix(GRPC_SCHEME).unwrap_or(location)
}

/// Extract header value from a line like "HEADER: value"
fn extract_header_value(line: &str, header: &str) -> Option<String> {
    if line.len() > header.len() && starts_with_ignore_case(line, header) {
        // `header` is ASCII, so a match ends on a char boundary.
        line.get(header.len()..).map(|value| value.trim().to_string())
    } else {
        None
    }
}

/// ASCII case-insensitive prefix test that never slices through a
/// multibyte character.
fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.as_bytes()
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix.as_bytes()))
}

fn parse_max_age(value: &str) -> Option<u64> {
    value.split(',').find_map(|directive| {
        let (key, val) = directive.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("max-age") {
            val.trim().parse().ok()
        } else {
            None
        }
    })
}
