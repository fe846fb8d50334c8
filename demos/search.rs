use floodlight::{
	discovery::{Discovery, SearchObserver, SearchSession},
	message::{MSearchRequest, MSearchResponse},
	search_target::SearchTarget,
};
use std::time::Duration;

struct Printer;
impl SearchObserver for Printer {
	fn device_discovered(&self, response: &MSearchResponse, _session: &SearchSession) {
		println!(
			"Found device {} ({}) at {}",
			response.usn(),
			response.server().unwrap_or("unknown server"),
			response.location()
		);
	}

	fn service_discovered(&self, response: &MSearchResponse, _session: &SearchSession) {
		println!("Found service {} at {}", response.usn(), response.location());
	}

	fn session_closed(&self, session: &SearchSession) {
		println!("Search for {} finished", session.target());
	}
}

fn main() {
	simple_logger::SimpleLogger::new()
		.with_level(log::LevelFilter::Debug)
		.init()
		.unwrap();

	let discovery = Discovery::builder().loopback().build();

	let request = MSearchRequest::new(SearchTarget::RootDevice)
		.observer(Printer)
		.max_wait(2)
		.header("USER-AGENT", "floodlight/0.1 UPnP/1.0");

	let session = discovery
		.start_search(request, Some(Duration::from_secs(10)))
		.expect("failed to open the SSDP socket");

	std::thread::sleep(Duration::from_secs(11));
	session.close();
}
