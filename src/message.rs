//! SSDP protocol messages and the text-datagram parser.

use crate::{discovery::SearchObserver, search_target::SearchTarget, SSDP_V4_ADDR};
use chrono::{DateTime, FixedOffset};
use std::{
	collections::HashMap,
	fmt,
	fmt::Write,
	hash::{Hash, Hasher},
	sync::Arc,
	time::Duration,
};
use url::Url;

/// Header keys the request always emits itself; caller-supplied extras
/// colliding with one of these are skipped.
const STANDARD_KEYS: [&str; 4] = ["HOST", "MAN", "MX", "ST"];

/// A parsed inbound SSDP datagram.
///
/// NOTIFY announcements (`ssdp:alive` / `ssdp:byebye`) and echoed M-SEARCH
/// requests exist on the wire but are not parsed into variants yet; the
/// parser drops them. Adding a variant here forces a review of every match
/// site, which is the point.
#[non_exhaustive]
#[derive(Clone, Debug)]
pub enum Message {
	SearchResponse(MSearchResponse),
}

/// An outbound M-SEARCH request.
///
/// Immutable once built; the wire message is derived on demand by
/// [`build_message`](MSearchRequest::build_message).
#[derive(Clone)]
pub struct MSearchRequest {
	observer: Arc<dyn SearchObserver>,
	max_wait: u32,
	target: SearchTarget,
	extra_headers: Vec<(String, String)>,
}

impl MSearchRequest {
	pub fn new(target: SearchTarget) -> Self {
		Self {
			observer: Arc::new(()),
			max_wait: 1,
			target,
			extra_headers: Vec::new(),
		}
	}

	/// The observer the session created for this request reports to.
	pub fn observer(mut self, observer: impl SearchObserver) -> Self {
		self.observer = Arc::new(observer);
		self
	}

	/// The `MX` header: how long, in seconds, responders may delay their
	/// response. Must be at least 1.
	pub fn max_wait(mut self, seconds: u32) -> Self {
		self.max_wait = seconds.max(1);
		self
	}

	/// Appends an additional header. Headers are emitted in insertion order;
	/// a key colliding with `HOST`, `MAN`, `MX` or `ST` is ignored.
	pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.extra_headers.push((key.into(), value.into()));
		self
	}

	#[inline(always)]
	pub fn target(&self) -> &SearchTarget {
		&self.target
	}

	pub(crate) fn observer_handle(&self) -> &dyn SearchObserver {
		&*self.observer
	}

	/// Derives the full wire message.
	pub fn build_message(&self) -> String {
		let mut message = format!(
			"M-SEARCH * HTTP/1.1\r\nHOST: {SSDP_V4_ADDR}\r\nMAN: ssdp:discover\r\nMX: {}\r\nST: {}\r\n",
			self.max_wait, self.target
		);
		for (key, value) in &self.extra_headers {
			if STANDARD_KEYS.iter().any(|standard| key.eq_ignore_ascii_case(standard)) {
				continue;
			}
			let _ = write!(message, "{key}: {value}\r\n");
		}
		message
	}
}

impl fmt::Debug for MSearchRequest {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MSearchRequest")
			.field("max_wait", &self.max_wait)
			.field("target", &self.target)
			.field("extra_headers", &self.extra_headers)
			.finish_non_exhaustive()
	}
}

/// One discovered device or service, as reported by an M-SEARCH response.
///
/// Constructed only by the parser from a validated header set; construction
/// either fully succeeds or fails.
#[derive(Clone, Debug)]
pub struct MSearchResponse {
	max_age: Option<Duration>,
	date: Option<DateTime<FixedOffset>>,
	ext: bool,
	location: Url,
	server: Option<String>,
	st: SearchTarget,
	usn: String,
	other_headers: HashMap<String, String>,
}

impl MSearchResponse {
	fn from_headers(mut headers: HashMap<String, String>) -> Option<Self> {
		let max_age = headers.remove("CACHE-CONTROL").and_then(|value| parse_max_age(&value));
		let date = headers
			.remove("DATE")
			.and_then(|value| DateTime::parse_from_rfc2822(&value).ok());
		let ext = headers.remove("EXT").is_some();
		if !ext {
			return None;
		}
		let location = Url::parse(&headers.remove("LOCATION")?).ok()?;
		let server = headers.remove("SERVER");
		let st = headers.remove("ST")?.parse::<SearchTarget>().ok()?;
		let usn = headers.remove("USN")?;

		Some(Self {
			max_age,
			date,
			ext,
			location,
			server,
			st,
			usn,
			other_headers: headers,
		})
	}

	/// How long the advertisement may be cached, from `CACHE-CONTROL: max-age=...`.
	#[inline(always)]
	pub fn max_age(&self) -> Option<Duration> {
		self.max_age
	}

	#[inline(always)]
	pub fn date(&self) -> Option<&DateTime<FixedOffset>> {
		self.date.as_ref()
	}

	/// Whether the `EXT` header was present. Construction fails without it,
	/// so this is always `true` on a parsed response.
	#[inline(always)]
	pub fn ext(&self) -> bool {
		self.ext
	}

	/// Where the responder's device description lives.
	#[inline(always)]
	pub fn location(&self) -> &Url {
		&self.location
	}

	#[inline(always)]
	pub fn server(&self) -> Option<&str> {
		self.server.as_deref()
	}

	#[inline(always)]
	pub fn search_target(&self) -> &SearchTarget {
		&self.st
	}

	/// The Unique Service Name: the stable identity of the responder.
	#[inline(always)]
	pub fn usn(&self) -> &str {
		&self.usn
	}

	/// Every header the parser did not consume, keys uppercased.
	#[inline(always)]
	pub fn other_headers(&self) -> &HashMap<String, String> {
		&self.other_headers
	}
}

// Discovery identity is the (USN, LOCATION) pair; server strings and
// timestamps vary between retransmissions of the same answer.
impl PartialEq for MSearchResponse {
	fn eq(&self, other: &Self) -> bool {
		self.usn == other.usn && self.location == other.location
	}
}
impl Eq for MSearchResponse {}
impl Hash for MSearchResponse {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.usn.hash(state);
		self.location.hash(state);
	}
}

/// Parses one raw UDP datagram into a [`Message`].
///
/// Anything unrecognized or malformed yields `None`; nothing in here is an
/// error the receive path needs to handle.
pub fn parse_datagram(raw: &str) -> Option<Message> {
	let mut lines = raw.lines().skip_while(|line| line.trim().is_empty());
	let first_token = lines.next()?.split_whitespace().next()?;

	let mut headers = HashMap::new();
	for line in lines {
		if let Some((key, value)) = split_header(line) {
			headers.insert(key.to_ascii_uppercase(), value.to_string());
		}
	}

	match first_token {
		"HTTP/1.1" => MSearchResponse::from_headers(headers).map(Message::SearchResponse),
		// NOTIFY and echoed M-SEARCH are recognized on the wire but not handled.
		_ => None,
	}
}

/// Splits a header line on one or more `:` or horizontal-whitespace
/// separator characters. Lines without a separator, or without a key in
/// front of it, are malformed and skipped; an empty value is fine.
fn split_header(line: &str) -> Option<(&str, &str)> {
	let is_separator = |c: char| c == ':' || c == ' ' || c == '\t';
	let at = line.find(is_separator)?;
	if at == 0 {
		return None;
	}
	Some((&line[..at], line[at..].trim_start_matches(is_separator).trim_end()))
}

fn parse_max_age(value: &str) -> Option<Duration> {
	let lower = value.to_ascii_lowercase();
	let at = lower.find("max-age")?;
	let after = lower[at + "max-age".len()..].trim_start().trim_start_matches('=').trim_start();
	let digits = after.chars().take_while(char::is_ascii_digit).collect::<String>();
	digits.parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn response_datagram() -> &'static str {
		"HTTP/1.1 200 OK\r\n\
		CACHE-CONTROL: max-age=1800\r\n\
		DATE: Sat, 01 Jan 2022 12:00:00 GMT\r\n\
		EXT:\r\n\
		LOCATION: http://192.168.1.37:8080/desc.xml\r\n\
		SERVER: Linux/5.4 UPnP/1.0 floodlight-test/1.0\r\n\
		ST: urn:schemas-upnp-org:service:ContentDirectory:1\r\n\
		USN: uuid:37::urn:schemas-upnp-org:service:ContentDirectory:1\r\n\
		BOOTID.UPNP.ORG: 12\r\n"
	}

	fn parse_response(raw: &str) -> Option<MSearchResponse> {
		match parse_datagram(raw) {
			Some(Message::SearchResponse(response)) => Some(response),
			None => None,
		}
	}

	#[test]
	fn builds_search() {
		let message = MSearchRequest::new(SearchTarget::RootDevice).max_wait(5).build_message();
		assert_eq!(
			message,
			"M-SEARCH * HTTP/1.1\r\n\
			HOST: 239.255.255.250:1900\r\n\
			MAN: ssdp:discover\r\n\
			MX: 5\r\n\
			ST: upnp:rootdevice\r\n"
		);
	}

	#[test]
	fn builds_search_with_extra_headers() {
		let message = MSearchRequest::new(SearchTarget::All)
			.header("USER-AGENT", "floodlight-test/1.0")
			.header("CONFIGID.UPNP.ORG", "1")
			.build_message();
		assert!(message.ends_with("ST: ssdp:all\r\nUSER-AGENT: floodlight-test/1.0\r\nCONFIGID.UPNP.ORG: 1\r\n"));
	}

	#[test]
	fn standard_headers_win_over_extras() {
		let message = MSearchRequest::new(SearchTarget::RootDevice)
			.header("host", "evil:1")
			.header("Man", "ssdp:undiscover")
			.header("MX", "99")
			.header("st", "ssdp:all")
			.header("USER-AGENT", "kept")
			.build_message();
		assert_eq!(message.matches("HOST").count(), 1);
		assert!(!message.contains("evil"));
		assert!(!message.contains("99"));
		assert!(!message.contains("undiscover"));
		assert!(message.contains("USER-AGENT: kept\r\n"));
	}

	#[test]
	fn max_wait_is_at_least_one() {
		let message = MSearchRequest::new(SearchTarget::RootDevice).max_wait(0).build_message();
		assert!(message.contains("MX: 1\r\n"));
	}

	#[test]
	fn accepts_response() {
		let response = parse_response(response_datagram()).unwrap();
		assert_eq!(response.max_age(), Some(Duration::from_secs(1800)));
		assert!(response.date().is_some());
		assert!(response.ext());
		assert_eq!(response.location().as_str(), "http://192.168.1.37:8080/desc.xml");
		assert_eq!(response.server(), Some("Linux/5.4 UPnP/1.0 floodlight-test/1.0"));
		assert_eq!(
			*response.search_target(),
			SearchTarget::service_type("schemas-upnp-org", "ContentDirectory", 1)
		);
		assert_eq!(response.usn(), "uuid:37::urn:schemas-upnp-org:service:ContentDirectory:1");
		assert_eq!(response.other_headers().get("BOOTID.UPNP.ORG").map(String::as_str), Some("12"));
	}

	#[test]
	fn rejects_empty() {
		assert!(parse_datagram("").is_none());
		assert!(parse_datagram("   \r\n \r\n").is_none());
	}

	#[test]
	fn skips_leading_newlines() {
		let raw = format!("\r\n\r\n{}", response_datagram());
		assert!(parse_response(&raw).is_some());
	}

	#[test]
	fn rejects_notify() {
		assert!(parse_datagram(
			"NOTIFY * HTTP/1.1\r\n\
			NT: upnp:rootdevice\r\n\
			NTS: ssdp:alive\r\n\
			USN: uuid:37\r\n\
			LOCATION: http://foo\r\n"
		)
		.is_none());
	}

	#[test]
	fn rejects_echoed_search() {
		assert!(parse_datagram("M-SEARCH * HTTP/1.1\r\nST: ssdp:all\r\nMX: 1\r\n").is_none());
	}

	#[test]
	fn rejects_garbage() {
		assert!(parse_datagram("foo-bar").is_none());
	}

	#[test]
	fn rejects_response_missing_required_headers() {
		for required in ["EXT", "LOCATION", "ST", "USN"] {
			let raw = response_datagram()
				.lines()
				.filter(|line| !line.starts_with(required))
				.collect::<Vec<_>>()
				.join("\r\n");
			assert!(parse_response(&raw).is_none(), "parsed without {required}");
		}
	}

	#[test]
	fn rejects_response_with_invalid_location() {
		let raw = response_datagram().replace("http://192.168.1.37:8080/desc.xml", "not a url at all");
		assert!(parse_response(&raw).is_none());
	}

	#[test]
	fn rejects_response_with_invalid_search_target() {
		let raw = response_datagram().replace("urn:schemas-upnp-org:service:ContentDirectory:1", "urn:nope");
		assert!(parse_response(&raw).is_none());
	}

	#[test]
	fn optional_fields_degrade_silently() {
		let raw = response_datagram()
			.replace("max-age=1800", "no-cache")
			.replace("Sat, 01 Jan 2022 12:00:00 GMT", "yesterday-ish");
		let response = parse_response(&raw).unwrap();
		assert_eq!(response.max_age(), None);
		assert!(response.date().is_none());
	}

	#[test]
	fn optional_fields_absent() {
		let response = parse_response(
			"HTTP/1.1 200 OK\r\n\
			EXT:\r\n\
			LOCATION: http://foo/\r\n\
			ST: upnp:rootdevice\r\n\
			USN: uuid:37\r\n",
		)
		.unwrap();
		assert_eq!(response.max_age(), None);
		assert!(response.date().is_none());
		assert_eq!(response.server(), None);
		assert!(response.other_headers().is_empty());
	}

	#[test]
	fn parses_whitespace_separated_headers() {
		let response = parse_response(
			"HTTP/1.1 200 OK\r\n\
			EXT \r\n\
			LOCATION\thttp://foo/\r\n\
			ST upnp:rootdevice\r\n\
			USN uuid:37\r\n",
		)
		.unwrap();
		assert_eq!(response.usn(), "uuid:37");
	}

	#[test]
	fn skips_malformed_header_lines() {
		let raw = response_datagram().replace("BOOTID.UPNP.ORG: 12", "this-line-has-no-separator");
		let response = parse_response(&raw).unwrap();
		assert!(response.other_headers().is_empty());
	}

	#[test]
	fn max_age_variants() {
		assert_eq!(parse_max_age("max-age=1800"), Some(Duration::from_secs(1800)));
		assert_eq!(parse_max_age("no-cache, MAX-AGE = 60"), Some(Duration::from_secs(60)));
		assert_eq!(parse_max_age("max-age="), None);
		assert_eq!(parse_max_age("max-age=soon"), None);
		assert_eq!(parse_max_age("no-cache"), None);
	}

	#[test]
	fn identity_is_usn_and_location() {
		let a = parse_response(response_datagram()).unwrap();
		let b = parse_response(
			&response_datagram()
				.replace("Linux/5.4 UPnP/1.0 floodlight-test/1.0", "Other/1.0")
				.replace("Sat, 01 Jan 2022", "Sun, 02 Jan 2022"),
		)
		.unwrap();
		assert_eq!(a, b);

		let c = parse_response(&response_datagram().replace("uuid:37", "uuid:38")).unwrap();
		assert_ne!(a, c);

		let d = parse_response(&response_datagram().replace(":8080", ":9090")).unwrap();
		assert_ne!(a, d);
	}
}
