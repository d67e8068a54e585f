use std::io::Write;

use serde_json::json;

use super::*;

fn assembler(origin_port: Option<u16>) -> (ConfigAssembler, MiddlewareParams) {
	let params = MiddlewareParams::new("/graphql", false);
	let mut options = SupervisorOptions::default();
	options.origin_port = origin_port;
	(ConfigAssembler::new(&params, &options), params)
}

fn no_env(_: &str) -> Option<String> {
	None
}

#[test]
fn test_synthesizes_origin_from_explicit_port() {
	let (assembler, params) = assembler(Some(4000));
	let config = assembler
		.assemble_with_env(ConfigSource::Value(json!({})), no_env)
		.unwrap();

	let origins = &config.document().origins;
	assert_eq!(origins.len(), 1);
	assert_eq!(origins[0].url, "http://127.0.0.1:4000/graphql");
	assert_eq!(origins[0].psk(), Some(params.psk()));
}

#[test]
fn test_synthesizes_origin_from_environment() {
	let (assembler, _) = assembler(None);
	let config = assembler
		.assemble_with_env(ConfigSource::Value(json!({})), |name| {
			assert_eq!(name, "PORT");
			Some("8080".to_string())
		})
		.unwrap();
	assert_eq!(config.document().origins[0].url, "http://127.0.0.1:8080/graphql");
}

#[test]
fn test_explicit_port_beats_environment() {
	let (assembler, _) = assembler(Some(4000));
	let config = assembler
		.assemble_with_env(ConfigSource::Value(json!({})), |_| Some("9999".to_string()))
		.unwrap();
	assert!(config.document().origins[0].url.contains(":4000"));
}

#[test]
fn test_missing_origin_port() {
	let (assembler, _) = assembler(None);
	let err = assembler
		.assemble_with_env(ConfigSource::Value(json!({})), no_env)
		.unwrap_err();
	assert!(matches!(err, Error::MissingOriginPort { ref env_var } if env_var == "PORT"));

	let err = assembler
		.assemble_with_env(ConfigSource::Value(json!({})), |_| Some("not-a-port".to_string()))
		.unwrap_err();
	assert!(matches!(err, Error::MissingOriginPort { .. }));
}

#[test]
fn test_http_origins_get_secret_and_others_are_untouched() {
	let (assembler, params) = assembler(None);
	let config = assembler
		.assemble_with_env(
			ConfigSource::Value(json!({
				"origins": [
					{"url": "http://a.internal/graphql", "headers": {"x-sidecar-psk": "stale", "x-keep": "1"}},
					{"url": "https://b.internal/graphql"},
					{"url": "ws://c.internal/socket", "headers": {"x-other": "2"}}
				]
			})),
			no_env,
		)
		.unwrap();

	let origins = &config.document().origins;
	assert_eq!(origins.len(), 3);
	assert_eq!(origins[0].psk(), Some(params.psk()));
	assert_eq!(origins[0].headers["x-keep"], "1");
	assert_eq!(origins[1].psk(), Some(params.psk()));
	assert_eq!(origins[2].psk(), None);
	assert_eq!(origins[2].headers.len(), 1);
}

#[test]
fn test_appends_exactly_one_loopback_frontend() {
	let (assembler, _) = assembler(Some(4000));
	let config = assembler
		.assemble_with_env(
			ConfigSource::Value(json!({
				"frontends": [{"host": "0.0.0.0", "port": 8443, "endpoint": "/public"}]
			})),
			no_env,
		)
		.unwrap();

	let frontends = &config.document().frontends;
	assert_eq!(frontends.len(), 2);
	assert_eq!(frontends[0].endpoint, "/public");
	assert_eq!(frontends[1].host, "127.0.0.1");
	assert_eq!(frontends[1].port, 0);
	assert_eq!(frontends[1].endpoint, "/graphql");
}

#[test]
fn test_logging_format_and_destination_are_forced() {
	let (assembler, _) = assembler(Some(4000));
	for logging in [
		json!({}),
		json!({"format": "TEXT", "destination": "FILE"}),
		json!({"format": "json", "destination": "stdout"}),
	] {
		let config = assembler
			.assemble_with_env(ConfigSource::Value(json!({"logging": logging})), no_env)
			.unwrap();
		let rendered: Value =
			serde_json::from_slice(&config.render(config.requested_level()).unwrap()).unwrap();
		assert_eq!(rendered["logging"]["format"], "JSON");
		assert_eq!(rendered["logging"]["destination"], "STDOUT");
	}
}

#[test]
fn test_render_is_one_line_and_never_mutates_base() {
	let (assembler, _) = assembler(Some(4000));
	let config = assembler
		.assemble_with_env(
			ConfigSource::Value(json!({"logging": {"level": "error"}})),
			no_env,
		)
		.unwrap();

	assert_eq!(config.requested_level(), LogLevel::Error);
	assert_eq!(config.startup_level(), LogLevel::Info);

	let first = config.render(config.startup_level()).unwrap();
	assert_eq!(first.last(), Some(&b'\n'));
	assert_eq!(first.iter().filter(|b| **b == b'\n').count(), 1);
	let first: Value = serde_json::from_slice(&first).unwrap();
	assert_eq!(first["logging"]["level"], "info");

	assert_eq!(config.requested_level(), LogLevel::Error);
	let again: Value = serde_json::from_slice(&config.render(config.startup_level()).unwrap()).unwrap();
	assert_eq!(again, first);
}

#[test]
fn test_startup_level_keeps_verbose_levels() {
	let (assembler, _) = assembler(Some(4000));
	let config = assembler
		.assemble_with_env(
			ConfigSource::Value(json!({"logging": {"level": "debug"}})),
			no_env,
		)
		.unwrap();
	assert_eq!(config.startup_level(), LogLevel::Debug);
}

#[test]
fn test_loads_from_file() {
	let (assembler, _) = assembler(Some(4000));
	let mut file = tempfile::NamedTempFile::new().unwrap();
	write!(file, r#"{{"logging": {{"level": "warn"}}, "cache": {{"ttl": 60}}}}"#).unwrap();

	let config = assembler
		.assemble_with_env(ConfigSource::from(file.path()), no_env)
		.unwrap();
	assert_eq!(config.requested_level(), LogLevel::Warn);
	assert_eq!(config.document().extra["cache"]["ttl"], 60);
}

#[test]
fn test_load_failures_are_config_load_errors() {
	let (assembler, _) = assembler(Some(4000));

	let err = assembler
		.assemble_with_env(ConfigSource::Path("/definitely/not/here.json".into()), no_env)
		.unwrap_err();
	assert!(matches!(err, Error::ConfigLoad { .. }));
	assert!(err.is_fatal());

	let mut file = tempfile::NamedTempFile::new().unwrap();
	write!(file, "{{ not json").unwrap();
	let err = assembler
		.assemble_with_env(ConfigSource::from(file.path()), no_env)
		.unwrap_err();
	assert!(matches!(err, Error::ConfigLoad { .. }));

	let err = assembler
		.assemble_with_env(ConfigSource::Value(json!({"logging": {"level": "loud"}})), no_env)
		.unwrap_err();
	assert!(matches!(err, Error::ConfigLoad { .. }));
}
