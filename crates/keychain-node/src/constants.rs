pub(crate) const DEFAULT_LISTEN: &str = "127.0.0.1:5000";
/// Upper bound on TCP connect time for peer requests.
pub(crate) const CONNECT_TIMEOUT_SECS: u64 = 2;
pub(crate) const BROADCAST_ROUTE: &str = "broadcast";
