#[derive(Debug)]
pub struct InvalidSearchTargetError;
impl std::fmt::Display for InvalidSearchTargetError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str("Not a recognized search target")
	}
}
impl std::error::Error for InvalidSearchTargetError {}

#[derive(Debug, Error)]
pub enum DiscoveryError {
	#[error("I/O error: {0}")]
	IoError(#[from] std::io::Error),
}
