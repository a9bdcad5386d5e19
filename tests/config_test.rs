//! Configuration system tests.

use kestrel_lib::core::config::LogLevel;
use kestrel_lib::core::{Compression, Config, ConfigBuilder, KestrelError, OtlpConfig};
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn test_default_config() {
    let config = Config::new().unwrap();
    assert_eq!(config.interval, Duration::from_secs(10));
    assert!(config.otlp.is_empty());
    assert!(config.parquet.is_none());
    assert!(!config.hostname.is_empty());
}

#[test]
fn test_yaml_config() {
    let yaml = r#"
hostname: db-1
interval: 15s
otlp:
  - name: primary
    host: collector.internal
    port: 14317
    timeout: 2s
  - name: backup
    flush_interval: 1m
parquet:
  basedir: /var/lib/kestrel
  file_duration: 2h
  buffer_duration: 30m
  buffer_size: 500
  compression: zstd
  compression_level: 7
logging:
  level: warn
"#;

    let config = ConfigBuilder::new().from_yaml(yaml).unwrap().build().unwrap();

    assert_eq!(config.hostname, "db-1");
    assert_eq!(config.interval, Duration::from_secs(15));
    assert_eq!(config.otlp.len(), 2);

    let primary = &config.otlp[0];
    assert_eq!(primary.endpoint(), "http://collector.internal:14317");
    assert_eq!(primary.timeout, Some(Duration::from_secs(2)));
    assert_eq!(config.otlp_flush_interval(primary), Duration::from_secs(15));

    let backup = &config.otlp[1];
    assert_eq!(backup.host, "localhost");
    assert_eq!(backup.port, 4317);
    assert_eq!(config.otlp_flush_interval(backup), Duration::from_secs(60));

    let parquet = config.parquet.as_ref().unwrap();
    assert_eq!(parquet.basedir, PathBuf::from("/var/lib/kestrel"));
    assert_eq!(parquet.file_duration, Duration::from_secs(7200));
    assert_eq!(parquet.buffer_duration, Duration::from_secs(1800));
    assert_eq!(parquet.buffer_size, 500);
    assert_eq!(parquet.compression, Compression::Zstd);
    assert_eq!(parquet.compression_level, Some(7));
    assert_eq!(config.parquet_flush_interval(parquet), Duration::from_secs(15));

    assert!(matches!(config.logging.level, LogLevel::Warn));
}

#[test]
fn test_parquet_defaults_and_off_alias() {
    let yaml = r#"
parquet:
  basedir: /tmp/kestrel
  compression: "off"
"#;
    let config = ConfigBuilder::new().from_yaml(yaml).unwrap().build().unwrap();
    let parquet = config.parquet.unwrap();
    assert_eq!(parquet.compression, Compression::Uncompressed);
    assert_eq!(parquet.file_duration, Duration::from_secs(3600));
    assert_eq!(parquet.buffer_duration, Duration::from_secs(3600));
    assert_eq!(parquet.buffer_size, 10_000);
}

#[test]
fn test_config_validation() {
    // Compression level outside the codec's range
    let yaml = "parquet:\n  basedir: /tmp/k\n  compression: brotli\n  compression_level: 12\n";
    let err = ConfigBuilder::new().from_yaml(yaml).unwrap().build().unwrap_err();
    assert!(matches!(err, KestrelError::Invalid(_)));

    // Level without a codec
    let yaml = "parquet:\n  basedir: /tmp/k\n  compression_level: 3\n";
    let err = ConfigBuilder::new().from_yaml(yaml).unwrap().build().unwrap_err();
    assert!(matches!(err, KestrelError::Invalid(_)));

    // Zero flush interval
    let mut sink = OtlpConfig::new("primary");
    sink.flush_interval = Some(Duration::ZERO);
    let err = ConfigBuilder::new().otlp(sink).build().unwrap_err();
    assert!(matches!(err, KestrelError::Invalid(_)));

    // Zero interval
    let err = ConfigBuilder::new().interval(Duration::ZERO).build().unwrap_err();
    assert!(matches!(err, KestrelError::Invalid(_)));
}

#[test]
fn test_malformed_yaml() {
    let err = ConfigBuilder::new().from_yaml("parquet:\n  compression: zstd\n").unwrap_err();
    assert!(matches!(err, KestrelError::Config(_)));

    let err = ConfigBuilder::new().from_yaml("interval: soon\n").unwrap_err();
    assert!(matches!(err, KestrelError::Config(_)));
}
