//! Failure classification helpers

use serde::{Deserialize, Serialize};
use std::fmt;

const DNS_INDICATORS: &[&str] = &[
    "clientconnectordnserror",
    "dns",
    "nodename nor servname",
    "name or service not known",
    "temporary failure in name resolution",
    "getaddrinfo failed",
];

const GATEWAY_INDICATORS: &[&str] = &[
    "gateway",
    "websocket",
    "session",
    "invalidat",
    "can't keep up",
    "heartbeat",
    "connectionclosed",
];

/// Kind of network failure recorded in the health log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureCategory {
    Dns,
    Gateway,
    Http,
    Resolver,
    Fetch,
    Unknown,
}

impl FailureCategory {
    /// Guess the category from an error message
    pub fn classify(message: &str) -> Self {
        if is_dns_error(message) {
            FailureCategory::Dns
        } else if is_gateway_error(message) {
            FailureCategory::Gateway
        } else {
            FailureCategory::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::Dns => "dns",
            FailureCategory::Gateway => "gateway",
            FailureCategory::Http => "http",
            FailureCategory::Resolver => "resolver",
            FailureCategory::Fetch => "fetch",
            FailureCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True if the message looks like a DNS resolution failure
pub fn is_dns_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    DNS_INDICATORS.iter().any(|i| lower.contains(i))
}

/// True if the message looks like a chat-gateway connection failure
pub fn is_gateway_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    GATEWAY_INDICATORS.iter().any(|i| lower.contains(i))
}

/// Operator hints for unstable VPN / tunnelled connections
pub fn troubleshooting_tips() -> &'static [&'static str] {
    &[
        "Ensure the VPN tunnel (e.g. WARP) is connected and stable",
        "Try switching the tunnel mode (WARP vs WARP+)",
        "Check whether the chat service domain is excluded in split-tunnel settings",
        "Use a stable DNS resolver (1.1.1.1 or 8.8.8.8)",
        "Restart the VPN client if issues persist",
        "Disable Wi-Fi power saving on your router",
        "Use an ethernet connection if possible",
        "Consider running the bot on a stable VPS",
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dns_detection() {
        assert!(is_dns_error("ClientConnectorDNSError: Cannot connect to host"));
        assert!(is_dns_error("nodename nor servname provided, or not known"));
        assert!(!is_dns_error("Connection timeout"));
    }

    #[test]
    fn test_gateway_detection() {
        assert!(is_gateway_error("websocket connection closed"));
        assert!(is_gateway_error("Can't keep up, heartbeat delayed"));
        assert!(!is_gateway_error("File not found"));
    }

    #[test]
    fn test_classify_prefers_dns() {
        assert_eq!(
            FailureCategory::classify("Temporary failure in name resolution"),
            FailureCategory::Dns
        );
        assert_eq!(FailureCategory::classify("gateway closed"), FailureCategory::Gateway);
        assert_eq!(FailureCategory::classify("disk full"), FailureCategory::Unknown);
    }

    #[test]
    fn test_tips_are_not_empty() {
        assert!(!troubleshooting_tips().is_empty());
    }
}
