//! State shared with request-routing middleware.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::RngCore;
use rand::rngs::OsRng;

/// Length of the shared secret before hex encoding.
pub const PSK_BYTES: usize = 48;

/// Values middleware needs to route traffic through the engine.
///
/// Created once per supervisor and shared by cloning. Middleware only reads;
/// the supervisor is the single writer of [`uri`](Self::uri). An empty `uri`
/// means no engine is reachable and requests must not be routed to it.
#[derive(Clone)]
pub struct MiddlewareParams {
	inner: Arc<ParamsInner>,
}

struct ParamsInner {
	endpoint: String,
	psk: String,
	dump_traffic: bool,
	uri: RwLock<String>,
}

impl MiddlewareParams {
	/// Creates params with a freshly generated secret.
	pub fn new(endpoint: impl Into<String>, dump_traffic: bool) -> Self {
		Self::with_psk(endpoint, generate_psk(), dump_traffic)
	}

	pub(crate) fn with_psk(endpoint: impl Into<String>, psk: String, dump_traffic: bool) -> Self {
		Self {
			inner: Arc::new(ParamsInner {
				endpoint: endpoint.into(),
				psk,
				dump_traffic,
				uri: RwLock::new(String::new()),
			}),
		}
	}

	/// Path the engine serves inbound traffic on.
	pub fn endpoint(&self) -> &str {
		&self.inner.endpoint
	}

	/// Shared secret the engine presents to origins.
	pub fn psk(&self) -> &str {
		&self.inner.psk
	}

	pub fn dump_traffic(&self) -> bool {
		self.inner.dump_traffic
	}

	/// Base URL of the running engine, or an empty string.
	pub fn uri(&self) -> String {
		self.inner.uri.read().clone()
	}

	/// Whether an engine is currently reachable.
	pub fn is_reachable(&self) -> bool {
		!self.inner.uri.read().is_empty()
	}

	pub(crate) fn set_uri(&self, uri: String) {
		*self.inner.uri.write() = uri;
	}

	pub(crate) fn clear_uri(&self) {
		self.inner.uri.write().clear();
	}
}

impl fmt::Debug for MiddlewareParams {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MiddlewareParams")
			.field("endpoint", &self.inner.endpoint)
			.field("psk", &"<redacted>")
			.field("uri", &*self.inner.uri.read())
			.field("dump_traffic", &self.inner.dump_traffic)
			.finish()
	}
}

/// Generates a hex-encoded secret from [`PSK_BYTES`] bytes of OS randomness.
pub fn generate_psk() -> String {
	let mut bytes = [0u8; PSK_BYTES];
	OsRng.fill_bytes(&mut bytes);
	hex::encode(bytes)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn psk_is_hex_of_expected_length() {
		let psk = generate_psk();
		assert_eq!(psk.len(), PSK_BYTES * 2);
		assert!(psk.chars().all(|c| c.is_ascii_hexdigit()));
		assert_ne!(psk, generate_psk());
	}

	#[test]
	fn uri_starts_empty_and_is_shared_between_clones() {
		let params = MiddlewareParams::new("/graphql", false);
		let view = params.clone();
		assert!(!view.is_reachable());

		params.set_uri("http://127.0.0.1:4000".to_string());
		assert_eq!(view.uri(), "http://127.0.0.1:4000");
		assert!(view.is_reachable());

		params.clear_uri();
		assert_eq!(view.uri(), "");
	}

	#[test]
	fn debug_output_hides_secret() {
		let params = MiddlewareParams::with_psk("/graphql", "s3cret".to_string(), true);
		let rendered = format!("{:?}", params);
		assert!(!rendered.contains("s3cret"));
		assert!(rendered.contains("/graphql"));
	}
}
