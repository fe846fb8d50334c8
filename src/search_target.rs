//! The search-target model: what class of device or service a search addresses.

use crate::errors::InvalidSearchTargetError;
use std::{fmt, str::FromStr};

/// The `ST`/`NT` field of an SSDP message.
///
/// Parsing is the strict inverse of formatting: a string that does not match
/// one of the five canonical shapes is rejected, never coerced to a default.
/// Schema strings are passed through unescaped; per UPnP convention, callers
/// are responsible for pre-escaping domain dots as hyphens
/// (`schemas-upnp-org`, not `schemas.upnp.org`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SearchTarget {
	/// `ssdp:all`: everything that speaks SSDP.
	All,

	/// `upnp:rootdevice`: root devices only.
	RootDevice,

	/// `uuid:<id>`: one specific device.
	Uuid(String),

	/// `urn:<schema>:device:<type>:<version>`: a device type.
	DeviceType {
		schema: String,
		device_type: String,
		version: u32,
	},

	/// `urn:<schema>:service:<type>:<version>`: a service type.
	ServiceType {
		schema: String,
		service_type: String,
		version: u32,
	},
}

impl SearchTarget {
	pub fn uuid(id: impl Into<String>) -> Self {
		Self::Uuid(id.into())
	}

	pub fn device_type(schema: impl Into<String>, device_type: impl Into<String>, version: u32) -> Self {
		Self::DeviceType {
			schema: schema.into(),
			device_type: device_type.into(),
			version,
		}
	}

	pub fn service_type(schema: impl Into<String>, service_type: impl Into<String>, version: u32) -> Self {
		Self::ServiceType {
			schema: schema.into(),
			service_type: service_type.into(),
			version,
		}
	}

	/// Whether a response carrying this target belongs to the service callback
	/// rather than the device callback.
	pub fn is_service(&self) -> bool {
		matches!(self, Self::ServiceType { .. })
	}
}

impl fmt::Display for SearchTarget {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::All => f.write_str("ssdp:all"),
			Self::RootDevice => f.write_str("upnp:rootdevice"),
			Self::Uuid(id) => write!(f, "uuid:{id}"),
			Self::DeviceType {
				schema,
				device_type,
				version,
			} => write!(f, "urn:{schema}:device:{device_type}:{version}"),
			Self::ServiceType {
				schema,
				service_type,
				version,
			} => write!(f, "urn:{schema}:service:{service_type}:{version}"),
		}
	}
}

impl FromStr for SearchTarget {
	type Err = InvalidSearchTargetError;

	fn from_str(raw: &str) -> Result<Self, Self::Err> {
		match raw.split(':').collect::<Vec<_>>().as_slice() {
			["ssdp", "all"] => Ok(Self::All),
			["upnp", "rootdevice"] => Ok(Self::RootDevice),
			["uuid", id] => Ok(Self::Uuid((*id).to_string())),
			["urn", schema, "device", device_type, version] => Ok(Self::DeviceType {
				schema: (*schema).to_string(),
				device_type: (*device_type).to_string(),
				version: version.parse().map_err(|_| InvalidSearchTargetError)?,
			}),
			["urn", schema, "service", service_type, version] => Ok(Self::ServiceType {
				schema: (*schema).to_string(),
				service_type: (*service_type).to_string(),
				version: version.parse().map_err(|_| InvalidSearchTargetError)?,
			}),
			_ => Err(InvalidSearchTargetError),
		}
	}
}
